//! Scaleway implementation of the provider session interface.
//!
//! Accounts map onto Scaleway projects and regions onto availability zones.
//! Instances are driven through `scaleway-rs`; listings, Kapsule pools, and
//! project checks use the JSON API directly.

mod error;
mod http;
mod instances;
mod pools;
mod types;

use std::collections::BTreeMap;
use std::future::Future;

use scaleway_rs::ScalewayApi;
use tracing::debug;

use crate::config::{ConfigError, ScalewayConfig};
use crate::model::{Account, ActionKind, Resource, ResourceKind, TagFilter};
use crate::provider::{
    BatchResponse, ProviderError, ProviderFuture, ProviderSession, Rejection, SessionError,
    SessionFactory, StateTransition,
};
use crate::retry::RetryPolicy;
use crate::telemetry::RunLog;
use http::ApiClient;
use instances::transitional_state;
use types::Zone;

/// Opens sessions against the Scaleway APIs with one secret key.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    client: ApiClient,
    retry: RetryPolicy,
    log: RunLog,
}

impl std::fmt::Debug for ScalewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayProvider").finish_non_exhaustive()
    }
}

impl ScalewayProvider {
    /// Constructs a provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(config: &ScalewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            client: ApiClient::new(&config.secret_key),
            retry: RetryPolicy::default(),
            log: RunLog::new(),
        })
    }

    /// Sets the retry budget for each per-resource call and the run whose
    /// span those retries are logged under.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy, log: RunLog) -> Self {
        self.retry = retry;
        self.log = log;
        self
    }
}

#[derive(Debug, serde::Deserialize)]
struct Project {
    id: String,
}

impl SessionFactory for ScalewayProvider {
    type Session = ScalewaySession;

    fn open<'a>(
        &'a self,
        account: &'a Account,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Session, SessionError> {
        Box::pin(async move {
            let fail = |source: ProviderError| SessionError {
                account: account.name.clone(),
                region: region.to_owned(),
                source,
            };
            let zone = Zone::parse(region).ok_or_else(|| {
                fail(ProviderError::Rejected {
                    message: format!("'{region}' is not a Scaleway zone such as fr-par-1"),
                })
            })?;
            let project: Project = self
                .client
                .get(
                    &format!("/account/v3/projects/{}", account.account_id),
                    &[],
                )
                .await
                .map_err(fail)?;
            debug!(project = %project.id, zone = %zone, "opened Scaleway session");
            Ok(ScalewaySession {
                api: self.api.clone(),
                client: self.client.clone(),
                retry: self.retry,
                log: self.log.for_pair(&account.name, region),
                account_id: account.account_id.clone(),
                zone,
            })
        })
    }
}

/// Provider session scoped to one project and zone.
#[derive(Clone)]
pub struct ScalewaySession {
    api: ScalewayApi,
    client: ApiClient,
    retry: RetryPolicy,
    log: RunLog,
    account_id: String,
    zone: Zone,
}

impl std::fmt::Debug for ScalewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewaySession")
            .field("account_id", &self.account_id)
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

impl ScalewaySession {
    async fn act(
        &self,
        kind: ResourceKind,
        ids: &[String],
        action: ActionKind,
        force: bool,
    ) -> Result<BatchResponse, ProviderError> {
        match kind {
            ResourceKind::Instance => self.act_on_servers(ids, action, force).await,
            ResourceKind::NodeGroup => self.act_on_pools(ids, action).await,
        }
    }

    async fn act_on_servers(
        &self,
        ids: &[String],
        action: ActionKind,
        force: bool,
    ) -> Result<BatchResponse, ProviderError> {
        let states = self.describe_servers(ids).await?;
        let mut response = BatchResponse::default();
        let mut pending = Vec::new();
        for id in ids {
            match states.get(id) {
                None => response.rejected.push(Rejection {
                    resource_id: id.clone(),
                    previous_state: None,
                    reason: format!("server {id} not found in {}", self.zone),
                }),
                Some(previous) if previous == action.target_state() => {
                    response.transitioned.push(StateTransition {
                        resource_id: id.clone(),
                        previous_state: previous.clone(),
                        current_state: previous.clone(),
                    });
                }
                Some(_) => pending.push(id.clone()),
            }
        }

        let results = attempt_each(self.retry, &self.log, action.as_str(), &pending, |id| {
            self.act_on_server(id, action, force)
        })
        .await;
        for (id, result) in pending.iter().zip(results) {
            let previous = states.get(id).cloned();
            match result {
                Ok(()) => response.transitioned.push(StateTransition {
                    resource_id: id.clone(),
                    previous_state: previous.unwrap_or_default(),
                    current_state: transitional_state(action).to_owned(),
                }),
                Err(err) => response.rejected.push(Rejection {
                    resource_id: id.clone(),
                    previous_state: previous,
                    reason: err.to_string(),
                }),
            }
        }
        Ok(response)
    }

    async fn act_on_pools(
        &self,
        ids: &[String],
        action: ActionKind,
    ) -> Result<BatchResponse, ProviderError> {
        let results = attempt_each(self.retry, &self.log, action.as_str(), ids, |id| {
            self.act_on_pool(id, action)
        })
        .await;
        let mut response = BatchResponse::default();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok((previous_state, current_state)) => {
                    response.transitioned.push(StateTransition {
                        resource_id: id.clone(),
                        previous_state,
                        current_state,
                    });
                }
                Err(err) => response.rejected.push(Rejection {
                    resource_id: id.clone(),
                    previous_state: None,
                    reason: err.to_string(),
                }),
            }
        }
        Ok(response)
    }
}

/// Issues one call per id in order, retrying transient faults for each id on
/// its own so one throttled resource does not fail its neighbours.
async fn attempt_each<'a, T, F, Fut>(
    retry: RetryPolicy,
    log: &RunLog,
    operation: &str,
    ids: &'a [String],
    call: F,
) -> Vec<Result<T, ProviderError>>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        results.push(retry.run(log, operation, || call(id.as_str())).await);
    }
    results
}

impl ProviderSession for ScalewaySession {
    fn find_tagged<'a>(
        &'a self,
        kind: ResourceKind,
        filter: &'a TagFilter,
    ) -> ProviderFuture<'a, Vec<Resource>> {
        Box::pin(async move {
            match kind {
                ResourceKind::Instance => self.find_tagged_servers(filter).await,
                ResourceKind::NodeGroup => self.find_tagged_pools(filter).await,
            }
        })
    }

    fn describe<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BTreeMap<String, String>> {
        Box::pin(async move {
            match kind {
                ResourceKind::Instance => self.describe_servers(resource_ids).await,
                ResourceKind::NodeGroup => self.describe_pools(resource_ids).await,
            }
        })
    }

    fn start<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BatchResponse> {
        Box::pin(async move { self.act(kind, resource_ids, ActionKind::Start, false).await })
    }

    fn stop<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
        force: bool,
    ) -> ProviderFuture<'a, BatchResponse> {
        Box::pin(async move { self.act(kind, resource_ids, ActionKind::Stop, force).await })
    }
}
