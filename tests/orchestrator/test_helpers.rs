//! Shared fixtures and helpers for orchestrator BDD scenarios.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use nocturne::test_support::FakeCloud;
use nocturne::{
    Account, AccountRegionOrchestrator, ActionKind, PollWindow, ReportRecord, ResourceKind,
    RetryPolicy, RunLog, RunPlan, TagFilter,
};
use rstest::fixture;

pub const REGION: &str = "fr-par-1";
pub const TAG_KEY: &str = "nocturne-schedule";
pub const TAG_VALUE: &str = "office-hours";

#[derive(Debug)]
pub struct OrchestratorContext {
    pub cloud: FakeCloud,
    pub accounts: RefCell<Vec<Account>>,
    pub records: RefCell<Option<Vec<ReportRecord>>>,
}

#[fixture]
pub fn orchestrator_context() -> OrchestratorContext {
    OrchestratorContext {
        cloud: FakeCloud::new(),
        accounts: RefCell::new(Vec::new()),
        records: RefCell::new(None),
    }
}

pub fn account_id(name: &str) -> String {
    format!("proj-{name}")
}

impl OrchestratorContext {
    /// Registers `name` in visit order the first time it is mentioned.
    pub fn ensure_account(&self, name: &str) -> String {
        let mut accounts = self.accounts.borrow_mut();
        if !accounts.iter().any(|account| account.name == name) {
            accounts.push(Account::new(name, account_id(name)));
        }
        account_id(name)
    }

    pub fn run(&self, action: ActionKind) {
        let plan = RunPlan {
            accounts: self.accounts.borrow().clone(),
            regions: vec![String::from(REGION)],
            tag: TagFilter::new(TAG_KEY, TAG_VALUE),
            action,
            force: false,
            kinds: vec![ResourceKind::Instance],
            verification: Some(PollWindow::new(
                Duration::from_secs(10),
                Duration::from_secs(1),
            )),
            deadline: None,
        };
        let orchestrator = AccountRegionOrchestrator::new(
            Arc::new(self.cloud.clone()),
            RetryPolicy::none(),
            RunLog::with_run_id("bdd"),
        );
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap_or_else(|err| panic!("runtime should build: {err}"));
        let records = runtime.block_on(async { orchestrator.run(&plan).await });
        self.records.replace(Some(records));
    }

    pub fn records(&self) -> Vec<ReportRecord> {
        self.records
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("the scheduler has not run yet"))
    }
}

pub fn status_label(record: &ReportRecord) -> String {
    match serde_json::to_value(record.status) {
        Ok(serde_json::Value::String(label)) => label,
        other => panic!("status should serialise to a string, got {other:?}"),
    }
}
