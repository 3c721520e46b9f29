//! Batch start/stop execution with per-resource outcome attribution.
//!
//! The provider answers one call for the whole batch. That answer is
//! partitioned so that every requested id ends up in exactly one of
//! `succeeded` or `failed`, whatever the provider chose to report.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::model::{ActionFailure, ActionKind, ActionRequest, ActionSuccess, BatchOutcome, ResourceKind};
use crate::provider::{BatchResponse, ProviderSession, Rejection, StateTransition};
use crate::retry::RetryPolicy;
use crate::telemetry::RunLog;

/// Reason attached to ids the provider did not mention in its answer.
pub const UNREPORTED_REASON: &str = "no result reported by provider";

/// Issues batch actions against one session.
#[derive(Debug)]
pub struct BatchActionExecutor<'s, S: ProviderSession> {
    session: &'s S,
    kind: ResourceKind,
    retry: RetryPolicy,
    log: RunLog,
}

impl<'s, S: ProviderSession> BatchActionExecutor<'s, S> {
    /// Creates an executor for resources of `kind`.
    #[must_use]
    pub const fn new(session: &'s S, kind: ResourceKind, retry: RetryPolicy, log: RunLog) -> Self {
        Self {
            session,
            kind,
            retry,
            log,
        }
    }

    /// Starts the given resources.
    pub async fn start(&self, resource_ids: &[String]) -> BatchOutcome {
        self.execute(&ActionRequest::start(resource_ids.iter().cloned()))
            .await
    }

    /// Stops the given resources, forwarding `force` to the provider.
    pub async fn stop(&self, resource_ids: &[String], force: bool) -> BatchOutcome {
        self.execute(&ActionRequest::stop(resource_ids.iter().cloned(), force))
            .await
    }

    /// Executes `request` as a single batch call and partitions the answer.
    ///
    /// Failures are returned as data: a rejected call puts every id in
    /// `failed` with the same message.
    pub async fn execute(&self, request: &ActionRequest) -> BatchOutcome {
        let ids = request.resource_ids();
        if ids.is_empty() {
            return BatchOutcome::default();
        }

        let operation = request.action().as_str();
        let response = self
            .retry
            .run(&self.log, operation, || match request.action() {
                ActionKind::Start => self.session.start(self.kind, ids),
                ActionKind::Stop => self.session.stop(self.kind, ids, request.force()),
            })
            .await;

        let outcome = match response {
            Ok(answer) => self.partition(ids, answer),
            Err(err) => {
                warn!(
                    parent: self.log.span(),
                    action = operation,
                    kind = %self.kind,
                    requested = ids.len(),
                    error = %err,
                    "batch call rejected"
                );
                let message = err.to_string();
                BatchOutcome {
                    succeeded: Vec::new(),
                    failed: ids
                        .iter()
                        .map(|id| ActionFailure {
                            resource_id: id.clone(),
                            previous_state: None,
                            error: message.clone(),
                        })
                        .collect(),
                }
            }
        };

        info!(
            parent: self.log.span(),
            action = operation,
            kind = %self.kind,
            force = request.force(),
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "batch action resolved"
        );
        outcome
    }

    fn partition(&self, ids: &[String], answer: BatchResponse) -> BatchOutcome {
        let mut transitioned: BTreeMap<String, StateTransition> = BTreeMap::new();
        let mut rejected: BTreeMap<String, Rejection> = BTreeMap::new();
        for transition in answer.transitioned {
            transitioned
                .entry(transition.resource_id.clone())
                .or_insert(transition);
        }
        for rejection in answer.rejected {
            if !transitioned.contains_key(&rejection.resource_id) {
                rejected
                    .entry(rejection.resource_id.clone())
                    .or_insert(rejection);
            }
        }

        let mut outcome = BatchOutcome::default();
        for id in ids {
            if let Some(transition) = transitioned.remove(id) {
                outcome.succeeded.push(ActionSuccess {
                    resource_id: transition.resource_id,
                    previous_state: transition.previous_state,
                    resulting_state: transition.current_state,
                });
            } else if let Some(rejection) = rejected.remove(id) {
                outcome.failed.push(ActionFailure {
                    resource_id: rejection.resource_id,
                    previous_state: rejection.previous_state,
                    error: rejection.reason,
                });
            } else {
                outcome.failed.push(ActionFailure {
                    resource_id: id.clone(),
                    previous_state: None,
                    error: String::from(UNREPORTED_REASON),
                });
            }
        }

        let unexpected = transitioned.len() + rejected.len();
        if unexpected > 0 {
            warn!(
                parent: self.log.span(),
                unexpected,
                "provider reported ids that were not requested"
            );
        }
        outcome
    }
}
