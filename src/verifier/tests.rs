//! Unit tests for state polling.

use std::time::Duration;

use super::*;
use crate::model::{Account, OutcomeStatus, STATE_RUNNING, STATE_STOPPED};
use crate::provider::{ProviderError, SessionFactory};
use crate::test_support::{FakeCloud, FakeResource, FakeSession};
use rstest::{fixture, rstest};

const ACCOUNT: &str = "proj-dev";
const ZONE: &str = "nl-ams-1";

#[fixture]
fn cloud() -> FakeCloud {
    FakeCloud::new()
}

#[fixture]
fn window() -> PollWindow {
    PollWindow::new(Duration::from_secs(10), Duration::from_secs(1))
}

async fn session(cloud: &FakeCloud) -> FakeSession {
    cloud
        .open(&Account::new("dev", ACCOUNT), ZONE)
        .await
        .expect("fake session opens")
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|id| (*id).to_owned()).collect()
}

async fn verify(
    cloud: &FakeCloud,
    raw_ids: &[&str],
    target: &str,
    window: PollWindow,
    deadline: Option<Instant>,
) -> VerificationReport {
    verify_with(cloud, RetryPolicy::none(), raw_ids, target, window, deadline).await
}

async fn verify_with(
    cloud: &FakeCloud,
    retry: RetryPolicy,
    raw_ids: &[&str],
    target: &str,
    window: PollWindow,
    deadline: Option<Instant>,
) -> VerificationReport {
    let session = session(cloud).await;
    StatePollingVerifier::new(&session, retry, RunLog::with_run_id("test"))
        .verify(ResourceKind::Instance, &ids(raw_ids), target, window, deadline)
        .await
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn target_reached_inside_window_is_verified(cloud: FakeCloud, window: PollWindow) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_STOPPED).describe_states([
            "starting",
            "starting",
            STATE_RUNNING,
        ]),
    );

    let report = verify(&cloud, &["i-1"], STATE_RUNNING, window, None).await;

    assert_eq!(
        report.verified,
        [VerificationOutcome::Verified {
            resource_id: String::from("i-1"),
            state: String::from(STATE_RUNNING),
        }]
    );
    assert!(report.failed.is_empty());
    assert_eq!(cloud.describe_calls().len(), 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn target_never_reached_times_out_within_the_poll_bound(
    cloud: FakeCloud,
    window: PollWindow,
) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_STOPPED).describe_states(["starting"]),
    );
    let started = Instant::now();

    let report = verify(&cloud, &["i-1"], STATE_RUNNING, window, None).await;

    assert!(report.verified.is_empty());
    assert_eq!(
        report.failed,
        [VerificationOutcome::Unverified {
            resource_id: String::from("i-1"),
            last_state: Some(String::from("starting")),
            reason: UnverifiedReason::TimedOut,
        }]
    );
    assert_eq!(report.failed[0].status(), OutcomeStatus::TimedOut);
    assert!(cloud.describe_calls().len() <= 11);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn only_outstanding_ids_are_polled(cloud: FakeCloud, window: PollWindow) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_RUNNING).describe_states([STATE_STOPPED]),
    );
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-2", STATE_RUNNING).describe_states([
            "stopping",
            "stopping",
            STATE_STOPPED,
        ]),
    );

    let report = verify(&cloud, &["i-1", "i-2"], STATE_STOPPED, window, None).await;

    assert_eq!(report.verified.len(), 2);
    assert_eq!(
        cloud.describe_calls(),
        [ids(&["i-1", "i-2"]), ids(&["i-2"]), ids(&["i-2"])]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn run_deadline_cuts_polling_short(cloud: FakeCloud, window: PollWindow) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_STOPPED).describe_states(["starting"]),
    );
    let deadline = Instant::now() + Duration::from_secs(3);

    let report = verify(&cloud, &["i-1"], STATE_RUNNING, window, Some(deadline)).await;

    assert_eq!(report.failed[0].status(), OutcomeStatus::TimedOut);
    assert_eq!(cloud.describe_calls().len(), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn vanished_resources_are_reported_missing(cloud: FakeCloud, window: PollWindow) {
    let report = verify(&cloud, &["i-gone"], STATE_RUNNING, window, None).await;

    assert!(matches!(
        report.outcome_for("i-gone"),
        Some(VerificationOutcome::Unverified {
            reason: UnverifiedReason::Missing,
            ..
        })
    ));
    assert_eq!(cloud.describe_calls().len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn terminal_describe_fault_fails_outstanding_ids(cloud: FakeCloud, window: PollWindow) {
    cloud.add_resource(ACCOUNT, ZONE, FakeResource::instance("i-1", STATE_STOPPED));
    cloud.fail_describes(
        ACCOUNT,
        ZONE,
        ProviderError::Unauthorized {
            message: String::from("token revoked"),
        },
    );

    let report = verify(&cloud, &["i-1"], STATE_RUNNING, window, None).await;

    let Some(VerificationOutcome::Unverified { reason, .. }) = report.outcome_for("i-1") else {
        panic!("expected an unverified outcome");
    };
    assert_eq!(
        *reason,
        UnverifiedReason::Provider(String::from("unauthorized: token revoked"))
    );
    assert_eq!(report.failed[0].status(), OutcomeStatus::Failed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn throttled_polls_stop_backing_off_at_the_deadline(cloud: FakeCloud, window: PollWindow) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_RUNNING).describe_states(["stopping"]),
    );
    cloud.throttle_next_calls(100);
    let retry = RetryPolicy {
        max_attempts: 5,
        min_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
    };
    let started = Instant::now();
    let deadline = started + Duration::from_secs(2);

    let report = verify_with(&cloud, retry, &["i-1"], STATE_STOPPED, window, Some(deadline)).await;

    assert!(started.elapsed() <= Duration::from_secs(2));
    assert_eq!(
        report.failed,
        [VerificationOutcome::Unverified {
            resource_id: String::from("i-1"),
            last_state: None,
            reason: UnverifiedReason::TimedOut,
        }]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn retried_state_queries_count_against_the_poll_bound(cloud: FakeCloud) {
    cloud.add_resource(
        ACCOUNT,
        ZONE,
        FakeResource::instance("i-1", STATE_RUNNING).describe_states(["stopping"]),
    );
    cloud.throttle_next_calls(100);
    let retry = RetryPolicy {
        max_attempts: 10,
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    };
    let short = PollWindow::new(Duration::from_secs(2), Duration::from_secs(1));

    let report = verify_with(&cloud, retry, &["i-1"], STATE_STOPPED, short, None).await;

    assert_eq!(cloud.describe_calls().len(), 3);
    assert_eq!(report.failed[0].status(), OutcomeStatus::TimedOut);
}

#[rstest]
fn describe_budget_follows_the_window() {
    assert_eq!(
        max_describe_calls(Duration::from_secs(10), Duration::from_secs(1)),
        11
    );
    assert_eq!(
        max_describe_calls(Duration::from_millis(2500), Duration::from_secs(1)),
        3
    );
    assert_eq!(max_describe_calls(Duration::ZERO, Duration::from_secs(1)), 1);
}
