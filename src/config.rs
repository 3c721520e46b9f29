//! Configuration loading via `ortho-config`.
//!
//! Two layered structs are read once at startup: [`ScalewayConfig`] for
//! credentials and defaults shared with the Scaleway CLI, and
//! [`SchedulerConfig`] for scheduling behaviour. Both are validated into a
//! typed [`RunSettings`] before any provider call is made.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{ResourceKind, TagFilter};
use crate::retry::RetryPolicy;
use crate::telemetry::LogFormat;
use crate::verifier::PollWindow;

/// Configuration file searched by the discovery rules.
pub const CONFIG_FILE_NAME: &str = "nocturne.toml";
/// Default tag key selecting scheduled resources.
pub const DEFAULT_TAG_KEY: &str = "nocturne-schedule";
/// Default tag value selecting scheduled resources.
pub const DEFAULT_TAG_VALUE: &str = "office-hours";

/// Scaleway credentials and defaults derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "nocturne",
        env_var = "NOCTURNE_CONFIG_PATH",
        config_file_name = "nocturne.toml",
        dotfile_name = ".nocturne.toml",
        project_file_name = "nocturne.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; kept so log lines can name the key in use.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Project used as the single `default` account when no accounts file is
    /// configured.
    pub default_project_id: Option<String>,
    /// Zone targeted when no `--region` is given. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
}

/// Scheduling behaviour loaded from `nocturne.toml` and `NOCTURNE_*`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NOCTURNE",
    discovery(
        app_name = "nocturne",
        env_var = "NOCTURNE_CONFIG_PATH",
        config_file_name = "nocturne.toml",
        dotfile_name = ".nocturne.toml",
        project_file_name = "nocturne.toml"
    )
)]
pub struct SchedulerConfig {
    /// Tag key selecting scheduled resources.
    #[ortho_config(default = DEFAULT_TAG_KEY.to_owned())]
    pub tag_key: String,
    /// Tag value selecting scheduled resources.
    #[ortho_config(default = DEFAULT_TAG_VALUE.to_owned())]
    pub tag_value: String,
    /// Comma-separated resource kinds processed in each pair.
    #[ortho_config(default = "instance".to_owned())]
    pub resource_kinds: String,
    /// Notification topic identifier carried through to reports.
    pub notification_topic: Option<String>,
    /// TOML file listing the accounts the scheduler may address.
    pub accounts_file: Option<String>,
    /// Seconds allowed for a resource to reach its target state.
    #[ortho_config(default = 300)]
    pub verify_timeout_secs: u64,
    /// Seconds between two state polls.
    #[ortho_config(default = 15)]
    pub check_interval_secs: u64,
    /// Account/region pairs processed at once.
    #[ortho_config(default = 1)]
    pub max_concurrency: usize,
    /// Overall run budget in seconds.
    pub run_deadline_secs: Option<u64>,
    /// Attempts per provider call, including the first.
    #[ortho_config(default = 5)]
    pub retry_max_attempts: usize,
    /// First backoff delay in milliseconds.
    #[ortho_config(default = 500)]
    pub retry_min_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[ortho_config(default = 10_000)]
    pub retry_max_delay_ms: u64,
    /// `tracing` filter directive.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// `text` or `json`.
    #[ortho_config(default = "text".to_owned())]
    pub log_format: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, detail: impl std::fmt::Display) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({detail}): check {} or {} in {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_optional(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    match value {
        Some(raw) if raw.trim().is_empty() => Err(metadata.missing()),
        _ => Ok(()),
    }
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("nocturne")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "default_zone"),
        )?;
        require_optional(
            self.default_project_id.as_deref(),
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
            ),
        )
    }
}

impl SchedulerConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("nocturne")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates every field and converts the struct into [`RunSettings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending variable and key.
    pub fn resolve(&self) -> Result<RunSettings, ConfigError> {
        let tag_key = FieldMetadata::new("tag key", "NOCTURNE_TAG_KEY", "tag_key");
        let tag_value = FieldMetadata::new("tag value", "NOCTURNE_TAG_VALUE", "tag_value");
        require_field(&self.tag_key, &tag_key)?;
        require_field(&self.tag_value, &tag_value)?;
        require_optional(
            self.notification_topic.as_deref(),
            &FieldMetadata::new(
                "notification topic",
                "NOCTURNE_NOTIFICATION_TOPIC",
                "notification_topic",
            ),
        )?;
        require_optional(
            self.accounts_file.as_deref(),
            &FieldMetadata::new("accounts file", "NOCTURNE_ACCOUNTS_FILE", "accounts_file"),
        )?;

        let kinds = parse_kinds(&self.resource_kinds)?;
        let poll_window = self.poll_window()?;

        if self.max_concurrency == 0 {
            return Err(FieldMetadata::new(
                "concurrency limit",
                "NOCTURNE_MAX_CONCURRENCY",
                "max_concurrency",
            )
            .invalid("must be at least 1"));
        }
        if self.run_deadline_secs == Some(0) {
            return Err(FieldMetadata::new(
                "run deadline",
                "NOCTURNE_RUN_DEADLINE_SECS",
                "run_deadline_secs",
            )
            .invalid("must be positive"));
        }

        Ok(RunSettings {
            tag: TagFilter::new(&self.tag_key, &self.tag_value),
            kinds,
            notification_topic: self.notification_topic.clone(),
            accounts_file: self.accounts_file.as_deref().map(Utf8PathBuf::from),
            poll_window,
            max_concurrency: self.max_concurrency,
            run_deadline: self.run_deadline_secs.map(Duration::from_secs),
            retry: self.retry_policy()?,
            log_level: self.log_level.trim().to_owned(),
            log_format: parse_log_format(&self.log_format)?,
        })
    }

    fn poll_window(&self) -> Result<PollWindow, ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(FieldMetadata::new(
                "check interval",
                "NOCTURNE_CHECK_INTERVAL_SECS",
                "check_interval_secs",
            )
            .invalid("must be positive"));
        }
        Ok(PollWindow::new(
            Duration::from_secs(self.verify_timeout_secs),
            Duration::from_secs(self.check_interval_secs),
        ))
    }

    fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.retry_max_attempts == 0 {
            return Err(FieldMetadata::new(
                "retry attempts",
                "NOCTURNE_RETRY_MAX_ATTEMPTS",
                "retry_max_attempts",
            )
            .invalid("must be at least 1"));
        }
        if self.retry_min_delay_ms > self.retry_max_delay_ms {
            return Err(FieldMetadata::new(
                "retry delays",
                "NOCTURNE_RETRY_MIN_DELAY_MS",
                "retry_min_delay_ms",
            )
            .invalid("minimum exceeds retry_max_delay_ms"));
        }
        Ok(RetryPolicy {
            max_attempts: self.retry_max_attempts,
            min_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        })
    }
}

fn parse_kinds(raw: &str) -> Result<Vec<ResourceKind>, ConfigError> {
    let metadata = FieldMetadata::new(
        "resource kinds",
        "NOCTURNE_RESOURCE_KINDS",
        "resource_kinds",
    );
    let mut kinds = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let kind: ResourceKind = entry.parse().map_err(|err| metadata.invalid(err))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(metadata.missing());
    }
    Ok(kinds)
}

fn parse_log_format(raw: &str) -> Result<LogFormat, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" | "" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(
            FieldMetadata::new("log format", "NOCTURNE_LOG_FORMAT", "log_format")
                .invalid(format!("'{other}' is neither text nor json")),
        ),
    }
}

/// Validated scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSettings {
    /// Tag selecting scheduled resources.
    pub tag: TagFilter,
    /// Kinds processed in each pair, in order.
    pub kinds: Vec<ResourceKind>,
    /// Notification topic identifier, if any.
    pub notification_topic: Option<String>,
    /// Accounts file location, if any.
    pub accounts_file: Option<Utf8PathBuf>,
    /// Verification window.
    pub poll_window: PollWindow,
    /// Pairs processed at once.
    pub max_concurrency: usize,
    /// Overall run budget.
    pub run_deadline: Option<Duration>,
    /// Backoff policy for provider calls.
    pub retry: RetryPolicy,
    /// `tracing` filter directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
