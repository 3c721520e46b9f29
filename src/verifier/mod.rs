//! Polls resource state until a target is observed or the window closes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::model::{ResourceKind, UnverifiedReason, VerificationOutcome};
use crate::provider::ProviderSession;
use crate::retry::RetryPolicy;
use crate::telemetry::RunLog;

/// Smallest wait honoured between two polls.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Largest number of describe calls one verification may make.
fn max_describe_calls(timeout: Duration, interval: Duration) -> usize {
    let polls = timeout.as_nanos() / interval.as_nanos().max(1);
    usize::try_from(polls).unwrap_or(usize::MAX).saturating_add(1)
}

/// Polling budget for one verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollWindow {
    /// Total time allowed for the target state to appear.
    pub timeout: Duration,
    /// Wait between two polls.
    pub check_interval: Duration,
}

impl PollWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(timeout: Duration, check_interval: Duration) -> Self {
        Self {
            timeout,
            check_interval,
        }
    }
}

/// Result of one verification, one entry per requested id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VerificationReport {
    /// Ids observed in the target state.
    pub verified: Vec<VerificationOutcome>,
    /// Ids that timed out, vanished, or could not be polled.
    pub failed: Vec<VerificationOutcome>,
}

impl VerificationReport {
    /// Looks up the outcome recorded for `resource_id`.
    #[must_use]
    pub fn outcome_for(&self, resource_id: &str) -> Option<&VerificationOutcome> {
        self.verified
            .iter()
            .chain(&self.failed)
            .find(|outcome| outcome.resource_id() == resource_id)
    }
}

/// Confirms that resources reached the state an action promised.
#[derive(Debug)]
pub struct StatePollingVerifier<'s, S: ProviderSession> {
    session: &'s S,
    retry: RetryPolicy,
    log: RunLog,
}

impl<'s, S: ProviderSession> StatePollingVerifier<'s, S> {
    /// Creates a verifier bound to a session.
    #[must_use]
    pub const fn new(session: &'s S, retry: RetryPolicy, log: RunLog) -> Self {
        Self {
            session,
            retry,
            log,
        }
    }

    /// Polls `resource_ids` until each reports `target_state`.
    ///
    /// Only outstanding ids are described on each poll. Polling ends when
    /// nothing is outstanding, when `window.timeout` has elapsed, or when
    /// `deadline` passes, whichever comes first; ids still outstanding then
    /// time out. Retried state queries share the same budget: no backoff
    /// sleeps past the end of the window, and at most
    /// `timeout / check_interval + 1` describe calls are made in total.
    pub async fn verify(
        &self,
        kind: ResourceKind,
        resource_ids: &[String],
        target_state: &str,
        window: PollWindow,
        deadline: Option<Instant>,
    ) -> VerificationReport {
        let started = Instant::now();
        let window_end = started + window.timeout;
        let end = deadline.map_or(window_end, |limit| limit.min(window_end));
        let interval = window.check_interval.max(MIN_CHECK_INTERVAL);

        let mut seen = BTreeSet::new();
        let mut outstanding: Vec<String> = resource_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let mut last_seen: BTreeMap<String, String> = BTreeMap::new();
        let mut settled: BTreeMap<String, VerificationOutcome> = BTreeMap::new();
        let call_budget = max_describe_calls(window.timeout, interval);
        let mut calls = 0_usize;
        let mut polls = 0_usize;

        while !outstanding.is_empty() && calls < call_budget {
            polls += 1;
            let ids = outstanding.clone();
            let mut attempts = 0_usize;
            let answer = self
                .retry
                .run_until(&self.log, "describe", end, call_budget - calls, || {
                    attempts += 1;
                    self.session.describe(kind, &ids)
                })
                .await;
            calls += attempts;
            let states = match answer {
                Some(Ok(states)) => states,
                None => {
                    debug!(parent: self.log.span(), poll = polls, "state query outlived the window");
                    break;
                }
                Some(Err(err)) if err.is_retryable() && attempts < self.retry.max_attempts => {
                    debug!(
                        parent: self.log.span(),
                        poll = polls,
                        error = %err,
                        "polling budget spent while backing off"
                    );
                    break;
                }
                Some(Err(err)) => {
                    warn!(
                        parent: self.log.span(),
                        kind = %kind,
                        outstanding = outstanding.len(),
                        error = %err,
                        "state query failed, abandoning verification"
                    );
                    let message = err.to_string();
                    for id in outstanding.drain(..) {
                        let last_state = last_seen.remove(&id);
                        settled.insert(
                            id.clone(),
                            VerificationOutcome::Unverified {
                                resource_id: id,
                                last_state,
                                reason: UnverifiedReason::Provider(message.clone()),
                            },
                        );
                    }
                    break;
                }
            };

            outstanding.retain(|id| match states.get(id) {
                Some(state) if state == target_state => {
                    settled.insert(
                        id.clone(),
                        VerificationOutcome::Verified {
                            resource_id: id.clone(),
                            state: state.clone(),
                        },
                    );
                    false
                }
                Some(state) => {
                    last_seen.insert(id.clone(), state.clone());
                    true
                }
                None => {
                    settled.insert(
                        id.clone(),
                        VerificationOutcome::Unverified {
                            resource_id: id.clone(),
                            last_state: last_seen.remove(id),
                            reason: UnverifiedReason::Missing,
                        },
                    );
                    false
                }
            });
            debug!(
                parent: self.log.span(),
                poll = polls,
                outstanding = outstanding.len(),
                "state poll complete"
            );

            if outstanding.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= end {
                break;
            }
            sleep_until((now + interval).min(end)).await;
        }

        for id in outstanding {
            let last_state = last_seen.remove(&id);
            settled.insert(
                id.clone(),
                VerificationOutcome::Unverified {
                    resource_id: id,
                    last_state,
                    reason: UnverifiedReason::TimedOut,
                },
            );
        }

        let mut report = VerificationReport::default();
        let mut emitted = BTreeSet::new();
        for id in resource_ids {
            if !emitted.insert(id.as_str()) {
                continue;
            }
            let Some(outcome) = settled.remove(id) else {
                continue;
            };
            match outcome {
                VerificationOutcome::Verified { .. } => report.verified.push(outcome),
                VerificationOutcome::Unverified { .. } => report.failed.push(outcome),
            }
        }

        info!(
            parent: self.log.span(),
            kind = %kind,
            target = target_state,
            polls,
            calls,
            verified = report.verified.len(),
            unverified = report.failed.len(),
            "verification finished"
        );
        report
    }
}

#[cfg(test)]
mod tests;
