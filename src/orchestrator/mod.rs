//! Drives discovery, action, and verification across the account/region
//! matrix.
//!
//! Every pair is isolated: a fault while opening a session or listing
//! resources becomes one failed pair-level record and the run moves on. Each
//! pair runs as its own task, so a panic is reported the same way. Pairs run
//! one after another unless a concurrency limit above one is configured, in
//! which case their tasks are gated by a semaphore. Records always come back
//! in visit order (accounts outer, regions inner).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::discovery::ResourceDiscovery;
use crate::executor::BatchActionExecutor;
use crate::model::{
    Account, ActionKind, ActionRequest, BatchOutcome, OutcomeStatus, Resource, ResourceKind,
    TagFilter, VerificationOutcome,
};
use crate::provider::SessionFactory;
use crate::report::ReportRecord;
use crate::retry::RetryPolicy;
use crate::telemetry::RunLog;
use crate::verifier::{PollWindow, StatePollingVerifier, VerificationReport};

/// Error attached to pairs and kinds skipped because the run deadline passed.
pub const DEADLINE_EXCEEDED: &str = "run deadline exceeded";

/// Everything one run needs, resolved before the run starts.
#[derive(Clone, Debug)]
pub struct RunPlan {
    /// Accounts to visit, in order.
    pub accounts: Vec<Account>,
    /// Regions visited inside each account, in order.
    pub regions: Vec<String>,
    /// Tag that selects resources.
    pub tag: TagFilter,
    /// Action to apply.
    pub action: ActionKind,
    /// Force flag forwarded on stop.
    pub force: bool,
    /// Resource kinds processed inside each pair, in order.
    pub kinds: Vec<ResourceKind>,
    /// Polling window; `None` skips verification.
    pub verification: Option<PollWindow>,
    /// Instant after which no new pair or kind starts and polling stops.
    pub deadline: Option<Instant>,
}

impl RunPlan {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|limit| Instant::now() >= limit)
    }

    fn pairs(&self) -> impl Iterator<Item = (Account, String)> + '_ {
        self.accounts.iter().flat_map(move |account| {
            self.regions
                .iter()
                .map(move |region| (account.clone(), region.clone()))
        })
    }
}

/// Resources found in one pair for one kind, used by dry runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PairListing {
    /// Account name.
    pub account: String,
    /// Region or zone.
    pub region: String,
    /// Kind listed; `None` when the pair failed before listing.
    pub kind: Option<ResourceKind>,
    /// Matching resources.
    pub resources: Vec<Resource>,
    /// Pair or discovery fault.
    pub error: Option<String>,
}

impl PairListing {
    fn failed(account: &Account, region: &str, kind: Option<ResourceKind>, error: String) -> Self {
        Self {
            account: account.name.clone(),
            region: region.to_owned(),
            kind,
            resources: Vec::new(),
            error: Some(error),
        }
    }
}

/// Iterates the account/region matrix for one action.
#[derive(Debug)]
pub struct AccountRegionOrchestrator<F: SessionFactory> {
    factory: Arc<F>,
    retry: RetryPolicy,
    log: RunLog,
    max_concurrency: usize,
}

impl<F: SessionFactory + 'static> AccountRegionOrchestrator<F> {
    /// Creates a sequential orchestrator.
    #[must_use]
    pub const fn new(factory: Arc<F>, retry: RetryPolicy, log: RunLog) -> Self {
        Self {
            factory,
            retry,
            log,
            max_concurrency: 1,
        }
    }

    /// Sets how many pairs may run at once; zero is treated as one.
    #[must_use]
    pub const fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = if limit == 0 { 1 } else { limit };
        self
    }

    /// Runs the full pipeline for every pair and returns the records.
    pub async fn run(&self, plan: &RunPlan) -> Vec<ReportRecord> {
        let shared = Arc::new(plan.clone());
        info!(
            parent: self.log.span(),
            action = %plan.action,
            tag = %plan.tag,
            accounts = plan.accounts.len(),
            regions = plan.regions.len(),
            verify = plan.verification.is_some(),
            "run started"
        );
        let records = self
            .visit(
                plan,
                |account, region| {
                    let pair = PairRun {
                        factory: Arc::clone(&self.factory),
                        plan: Arc::clone(&shared),
                        retry: self.retry,
                        log: self.log.for_pair(&account.name, &region),
                        account,
                        region,
                    };
                    pair.run()
                },
                |account, region, error| {
                    vec![ReportRecord::pair_failure(
                        &account.name,
                        region,
                        plan.action,
                        error,
                    )]
                },
            )
            .await;
        let failed = records
            .iter()
            .filter(|record| !record.status.is_success())
            .count();
        info!(
            parent: self.log.span(),
            records = records.len(),
            failed,
            "run finished"
        );
        records
    }

    /// Runs discovery only, returning one listing per pair and kind.
    pub async fn discover(&self, plan: &RunPlan) -> Vec<PairListing> {
        let shared = Arc::new(plan.clone());
        self.visit(
            plan,
            |account, region| {
                let pair = PairRun {
                    factory: Arc::clone(&self.factory),
                    plan: Arc::clone(&shared),
                    retry: self.retry,
                    log: self.log.for_pair(&account.name, &region),
                    account,
                    region,
                };
                pair.list()
            },
            |account, region, error| vec![PairListing::failed(account, region, None, error)],
        )
        .await
    }

    async fn visit<T, Fut, M, P>(&self, plan: &RunPlan, make: M, on_fault: P) -> Vec<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Vec<T>> + Send + 'static,
        M: Fn(Account, String) -> Fut,
        P: Fn(&Account, &str, String) -> Vec<T>,
    {
        let mut output = Vec::new();
        if self.max_concurrency <= 1 {
            for (account, region) in plan.pairs() {
                let handle = tokio::spawn(make(account.clone(), region.clone()));
                output.extend(self.join_pair(&account, &region, handle, &on_fault).await);
            }
            return output;
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::new();
        for (account, region) in plan.pairs() {
            let pending = make(account.clone(), region.clone());
            let gate = Arc::clone(&permits);
            let handle = tokio::spawn(async move {
                let _permit = gate.acquire_owned().await.ok();
                pending.await
            });
            handles.push((account, region, handle));
        }
        for (account, region, handle) in handles {
            output.extend(self.join_pair(&account, &region, handle, &on_fault).await);
        }
        output
    }

    async fn join_pair<T, P>(
        &self,
        account: &Account,
        region: &str,
        handle: JoinHandle<Vec<T>>,
        on_fault: &P,
    ) -> Vec<T>
    where
        P: Fn(&Account, &str, String) -> Vec<T>,
    {
        match handle.await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    parent: self.log.span(),
                    account = %account.name,
                    region = %region,
                    error = %err,
                    "pair task aborted"
                );
                on_fault(account, region, format!("pair task failed: {err}"))
            }
        }
    }
}

/// One account/region pair, owned so it can move into a task.
struct PairRun<F: SessionFactory> {
    factory: Arc<F>,
    plan: Arc<RunPlan>,
    retry: RetryPolicy,
    log: RunLog,
    account: Account,
    region: String,
}

impl<F: SessionFactory> PairRun<F> {
    fn pair_failure(&self, kind: Option<ResourceKind>, error: String) -> ReportRecord {
        let mut record =
            ReportRecord::pair_failure(&self.account.name, &self.region, self.plan.action, error);
        record.resource_kind = kind;
        record
    }

    async fn run(self) -> Vec<ReportRecord> {
        if self.plan.deadline_passed() {
            warn!(parent: self.log.span(), "pair skipped, run deadline exceeded");
            return vec![self.pair_failure(None, String::from(DEADLINE_EXCEEDED))];
        }
        let session = match self.factory.open(&self.account, &self.region).await {
            Ok(session) => session,
            Err(err) => {
                warn!(parent: self.log.span(), error = %err, "session could not be opened");
                return vec![self.pair_failure(None, err.to_string())];
            }
        };

        let mut records = Vec::new();
        for &kind in &self.plan.kinds {
            if self.plan.deadline_passed() {
                warn!(parent: self.log.span(), kind = %kind, "kind skipped, run deadline exceeded");
                records.push(self.pair_failure(Some(kind), String::from(DEADLINE_EXCEEDED)));
                continue;
            }
            let discovery = ResourceDiscovery::new(&session, self.retry, self.log.clone());
            let resources = match discovery
                .find_tagged(kind, &self.plan.tag.key, &self.plan.tag.value)
                .await
            {
                Ok(resources) => resources,
                Err(err) => {
                    warn!(parent: self.log.span(), error = %err, "discovery failed");
                    records.push(self.pair_failure(Some(kind), err.to_string()));
                    continue;
                }
            };
            if resources.is_empty() {
                continue;
            }
            if self.plan.deadline_passed() {
                warn!(parent: self.log.span(), kind = %kind, "action skipped, run deadline exceeded");
                records.push(self.pair_failure(Some(kind), String::from(DEADLINE_EXCEEDED)));
                continue;
            }

            let request = ActionRequest::new(
                resources.iter().map(|resource| resource.id.clone()),
                self.plan.action,
                self.plan.force,
            );
            let executor = BatchActionExecutor::new(&session, kind, self.retry, self.log.clone());
            let outcome = executor.execute(&request).await;

            let verification = match self.plan.verification {
                Some(window) if !outcome.succeeded.is_empty() => {
                    let accepted: Vec<String> = outcome
                        .succeeded
                        .iter()
                        .map(|success| success.resource_id.clone())
                        .collect();
                    let verifier =
                        StatePollingVerifier::new(&session, self.retry, self.log.clone());
                    Some(
                        verifier
                            .verify(
                                kind,
                                &accepted,
                                self.plan.action.target_state(),
                                window,
                                self.plan.deadline,
                            )
                            .await,
                    )
                }
                _ => None,
            };

            records.extend(self.records_for(
                kind,
                &resources,
                &request,
                &outcome,
                verification.as_ref(),
            ));
        }
        records
    }

    fn records_for(
        &self,
        kind: ResourceKind,
        resources: &[Resource],
        request: &ActionRequest,
        outcome: &BatchOutcome,
        verification: Option<&VerificationReport>,
    ) -> Vec<ReportRecord> {
        let names: BTreeMap<&str, &str> = resources
            .iter()
            .map(|resource| (resource.id.as_str(), resource.name.as_str()))
            .collect();
        let successes: BTreeMap<&str, _> = outcome
            .succeeded
            .iter()
            .map(|success| (success.resource_id.as_str(), success))
            .collect();
        let failures: BTreeMap<&str, _> = outcome
            .failed
            .iter()
            .map(|failure| (failure.resource_id.as_str(), failure))
            .collect();

        let mut records = Vec::with_capacity(request.resource_ids().len());
        for id in request.resource_ids() {
            let mut record = ReportRecord {
                account: self.account.name.clone(),
                region: self.region.clone(),
                resource_id: Some(id.clone()),
                resource_name: names.get(id.as_str()).map(|name| (*name).to_owned()),
                resource_kind: Some(kind),
                previous_state: None,
                new_state: None,
                action: self.plan.action,
                timestamp: chrono::Utc::now(),
                status: OutcomeStatus::Failed,
                error: None,
            };
            if let Some(success) = successes.get(id.as_str()) {
                record.previous_state = Some(success.previous_state.clone());
                record.new_state = Some(success.resulting_state.clone());
                record.status = OutcomeStatus::Succeeded;
                if let Some(checked) = verification.and_then(|report| report.outcome_for(id)) {
                    record.status = checked.status();
                    match checked {
                        VerificationOutcome::Verified { state, .. } => {
                            record.new_state = Some(state.clone());
                        }
                        VerificationOutcome::Unverified {
                            last_state, reason, ..
                        } => {
                            if let Some(state) = last_state {
                                record.new_state = Some(state.clone());
                            }
                            record.error = Some(reason.to_string());
                        }
                    }
                }
            } else if let Some(failure) = failures.get(id.as_str()) {
                record.previous_state.clone_from(&failure.previous_state);
                record.error = Some(failure.error.clone());
            }
            records.push(record);
        }
        records
    }

    async fn list(self) -> Vec<PairListing> {
        if self.plan.deadline_passed() {
            return vec![PairListing::failed(
                &self.account,
                &self.region,
                None,
                String::from(DEADLINE_EXCEEDED),
            )];
        }
        let session = match self.factory.open(&self.account, &self.region).await {
            Ok(session) => session,
            Err(err) => {
                warn!(parent: self.log.span(), error = %err, "session could not be opened");
                return vec![PairListing::failed(
                    &self.account,
                    &self.region,
                    None,
                    err.to_string(),
                )];
            }
        };

        let mut listings = Vec::with_capacity(self.plan.kinds.len());
        for &kind in &self.plan.kinds {
            if self.plan.deadline_passed() {
                listings.push(PairListing::failed(
                    &self.account,
                    &self.region,
                    Some(kind),
                    String::from(DEADLINE_EXCEEDED),
                ));
                continue;
            }
            let discovery = ResourceDiscovery::new(&session, self.retry, self.log.clone());
            let listing = match discovery
                .find_tagged(kind, &self.plan.tag.key, &self.plan.tag.value)
                .await
            {
                Ok(resources) => PairListing {
                    account: self.account.name.clone(),
                    region: self.region.clone(),
                    kind: Some(kind),
                    resources,
                    error: None,
                },
                Err(err) => {
                    PairListing::failed(&self.account, &self.region, Some(kind), err.to_string())
                }
            };
            listings.push(listing);
        }
        listings
    }
}
