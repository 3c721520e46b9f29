//! BDD scenarios for scheduled runs.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OrchestratorContext, orchestrator_context};

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Stop tagged instances in every account"
)]
fn scenario_stop_every_account(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Keep going when one account cannot be reached"
)]
fn scenario_isolate_unreachable_account(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Report resources that never settle"
)]
fn scenario_unsettled_resources(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Report provider rejections without verifying them"
)]
fn scenario_rejections(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}
