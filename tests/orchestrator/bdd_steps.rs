//! BDD step definitions for scheduled runs.

use nocturne::test_support::{FakeResource, ProviderCall};
use nocturne::{ActionKind, OutcomeStatus, ProviderError};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{OrchestratorContext, REGION, TAG_KEY, TAG_VALUE, status_label};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn tagged(id: &str, state: &str) -> FakeResource {
    FakeResource::instance(id, state).tag(TAG_KEY, TAG_VALUE)
}

#[given("account \"{name}\" with a {state} tagged instance \"{id}\"")]
fn tagged_instance(
    orchestrator_context: &OrchestratorContext,
    name: String,
    state: String,
    id: String,
) {
    let account_id = orchestrator_context.ensure_account(&name);
    orchestrator_context
        .cloud
        .add_resource(&account_id, REGION, tagged(&id, &state));
}

#[given("account \"{name}\" with a {state} untagged instance \"{id}\"")]
fn untagged_instance(
    orchestrator_context: &OrchestratorContext,
    name: String,
    state: String,
    id: String,
) {
    let account_id = orchestrator_context.ensure_account(&name);
    orchestrator_context.cloud.add_resource(
        &account_id,
        REGION,
        FakeResource::instance(&id, &state).tag(TAG_KEY, "always-on"),
    );
}

#[given("account \"{name}\" with a {state} tagged instance \"{id}\" that never settles")]
fn unsettled_instance(
    orchestrator_context: &OrchestratorContext,
    name: String,
    state: String,
    id: String,
) {
    let account_id = orchestrator_context.ensure_account(&name);
    orchestrator_context
        .cloud
        .add_resource(&account_id, REGION, tagged(&id, &state).never_settles());
}

#[given("account \"{name}\" with a {state} tagged instance \"{id}\" that is over quota")]
fn rejected_instance(
    orchestrator_context: &OrchestratorContext,
    name: String,
    state: String,
    id: String,
) {
    let account_id = orchestrator_context.ensure_account(&name);
    orchestrator_context.cloud.add_resource(
        &account_id,
        REGION,
        tagged(&id, &state).rejecting("quota exceeded"),
    );
}

#[given("sessions for account \"{name}\" are unauthorized")]
fn unauthorized_sessions(orchestrator_context: &OrchestratorContext, name: String) {
    let account_id = orchestrator_context.ensure_account(&name);
    orchestrator_context.cloud.fail_sessions(
        &account_id,
        ProviderError::Unauthorized {
            message: String::from("token expired"),
        },
    );
}

#[when("the scheduler stops tagged instances")]
fn stop_instances(orchestrator_context: &OrchestratorContext) {
    orchestrator_context.run(ActionKind::Stop);
}

#[when("the scheduler starts tagged instances")]
fn start_instances(orchestrator_context: &OrchestratorContext) {
    orchestrator_context.run(ActionKind::Start);
}

#[then("{count:u32} records are reported")]
fn records_reported(
    orchestrator_context: &OrchestratorContext,
    count: u32,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    if records.len() == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} records, got {records:?}"
        )))
    }
}

#[then("every record succeeded with state \"{state}\"")]
fn every_record_succeeded(
    orchestrator_context: &OrchestratorContext,
    state: String,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    let stray = records.iter().find(|record| {
        record.status != OutcomeStatus::Succeeded || record.new_state.as_deref() != Some(&state)
    });
    match stray {
        None => Ok(()),
        Some(record) => Err(StepError::Assertion(format!(
            "expected success in state {state}, got {record:?}"
        ))),
    }
}

#[then("instance \"{id}\" in account \"{name}\" is still \"{state}\"")]
fn instance_untouched(
    orchestrator_context: &OrchestratorContext,
    id: String,
    name: String,
    state: String,
) -> Result<(), StepError> {
    let account_id = super::test_helpers::account_id(&name);
    let current = orchestrator_context.cloud.state_of(&account_id, REGION, &id);
    if current.as_deref() == Some(state.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} to stay {state}, found {current:?}"
        )))
    }
}

#[then("account \"{name}\" reports a pair-level failure mentioning \"{text}\"")]
fn pair_level_failure(
    orchestrator_context: &OrchestratorContext,
    name: String,
    text: String,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    let mine: Vec<_> = records.iter().filter(|record| record.account == name).collect();
    let [record] = mine.as_slice() else {
        return Err(StepError::Assertion(format!(
            "expected one record for {name}, got {mine:?}"
        )));
    };
    let mentions = record
        .error
        .as_deref()
        .is_some_and(|error| error.contains(&text));
    if record.is_pair_level() && record.status == OutcomeStatus::Failed && mentions {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a pair-level failure mentioning {text}, got {record:?}"
        )))
    }
}

#[then("account \"{name}\" reports {count:u32} successful record")]
fn successful_records(
    orchestrator_context: &OrchestratorContext,
    name: String,
    count: u32,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    let successes = records
        .iter()
        .filter(|record| record.account == name && record.status.is_success())
        .count();
    if successes == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} successes for {name}, got {records:?}"
        )))
    }
}

#[then("the record for \"{id}\" is \"{status}\" with state \"{state}\"")]
fn record_with_state(
    orchestrator_context: &OrchestratorContext,
    id: String,
    status: String,
    state: String,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    let record = records
        .iter()
        .find(|record| record.resource_id.as_deref() == Some(id.as_str()))
        .ok_or_else(|| StepError::Assertion(format!("no record for {id}")))?;
    if status_label(record) == status && record.new_state.as_deref() == Some(state.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {status} in state {state}, got {record:?}"
        )))
    }
}

#[then("the record for \"{id}\" is \"{status}\" with error \"{error}\"")]
fn record_with_error(
    orchestrator_context: &OrchestratorContext,
    id: String,
    status: String,
    error: String,
) -> Result<(), StepError> {
    let records = orchestrator_context.records();
    let record = records
        .iter()
        .find(|record| record.resource_id.as_deref() == Some(id.as_str()))
        .ok_or_else(|| StepError::Assertion(format!("no record for {id}")))?;
    if status_label(record) == status && record.error.as_deref() == Some(error.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {status} with error {error}, got {record:?}"
        )))
    }
}

#[then("no state checks were made")]
fn no_state_checks(orchestrator_context: &OrchestratorContext) -> Result<(), StepError> {
    let describes = orchestrator_context
        .cloud
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Describe { .. }))
        .count();
    if describes == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no describe calls, saw {describes}"
        )))
    }
}
