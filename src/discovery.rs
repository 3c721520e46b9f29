//! Tag-driven resource discovery within one account/region pair.

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Resource, ResourceKind, TagFilter};
use crate::provider::{ProviderError, ProviderSession};
use crate::retry::RetryPolicy;
use crate::telemetry::RunLog;

/// Raised when the provider fails while listing resources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("discovery of {kind} resources failed: {source}")]
pub struct DiscoveryError {
    /// Kind being listed.
    pub kind: ResourceKind,
    /// Classified provider fault.
    #[source]
    pub source: ProviderError,
}

/// Finds resources carrying an exact tag pair.
#[derive(Debug)]
pub struct ResourceDiscovery<'s, S: ProviderSession> {
    session: &'s S,
    retry: RetryPolicy,
    log: RunLog,
}

impl<'s, S: ProviderSession> ResourceDiscovery<'s, S> {
    /// Creates a discovery component bound to a session.
    #[must_use]
    pub const fn new(session: &'s S, retry: RetryPolicy, log: RunLog) -> Self {
        Self {
            session,
            retry,
            log,
        }
    }

    /// Returns every resource of `kind` whose tags contain `key=value`.
    ///
    /// An empty result is not an error. Resources the provider returns with
    /// the key but another value are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the provider fails after retries.
    pub async fn find_tagged(
        &self,
        kind: ResourceKind,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<Resource>, DiscoveryError> {
        let filter = TagFilter::new(tag_key, tag_value);
        let listed = self
            .retry
            .run(&self.log, "find_tagged", || {
                self.session.find_tagged(kind, &filter)
            })
            .await
            .map_err(|source| DiscoveryError { kind, source })?;

        let total = listed.len();
        let matched: Vec<Resource> = listed
            .into_iter()
            .filter(|resource| resource.kind == kind && filter.matches(&resource.tags))
            .collect();
        if matched.len() != total {
            debug!(
                parent: self.log.span(),
                dropped = total - matched.len(),
                "provider returned resources outside the tag filter"
            );
        }
        info!(
            parent: self.log.span(),
            kind = %kind,
            tag = %filter,
            found = matched.len(),
            "discovered tagged resources"
        );
        Ok(matched)
    }
}
