//! Per-run logging handle and subscriber installation.
//!
//! Components never log through ambient state: each one receives a
//! [`RunLog`] at construction and emits events under its span, so every line
//! carries the run id and, inside a pair, the account and region.

use std::io;

use thiserror::Error;
use tracing::Span;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Output format for the installed subscriber.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Raised when the filter directive cannot be parsed.
    #[error("invalid log filter '{directive}': {message}")]
    Filter {
        /// Directive supplied through configuration.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// Raised when a global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Logging handle scoped to one scheduler run.
#[derive(Clone, Debug)]
pub struct RunLog {
    run_id: String,
    span: Span,
}

impl RunLog {
    /// Opens a run span with a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4().simple().to_string())
    }

    /// Opens a run span using the supplied identifier.
    #[must_use]
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        let id = run_id.into();
        let span = tracing::info_span!("run", run_id = %id);
        Self { run_id: id, span }
    }

    /// Returns a child handle scoped to one account/region pair.
    #[must_use]
    pub fn for_pair(&self, account: &str, region: &str) -> Self {
        let span = tracing::info_span!(parent: &self.span, "pair", account = %account, region = %region);
        Self {
            run_id: self.run_id.clone(),
            span,
        }
    }

    /// Identifier shared by every event of the run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span that events should be parented to.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global fmt subscriber, writing to stderr.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the directive is invalid or a subscriber
/// is already installed.
pub fn init_subscriber(directive: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(directive).map_err(|err| TelemetryError::Filter {
        directive: directive.to_owned(),
        message: err.to_string(),
    })?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| TelemetryError::Install(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_handles_keep_the_run_id() {
        let log = RunLog::with_run_id("run-1");
        let pair = log.for_pair("prod", "fr-par-1");
        assert_eq!(pair.run_id(), "run-1");
    }

    #[test]
    fn invalid_directive_is_reported() {
        let err = init_subscriber("nocturne=loud", LogFormat::Text).expect_err("directive is invalid");
        assert!(matches!(err, TelemetryError::Filter { .. }), "got {err:?}");
    }
}
