//! Core library for the Nocturne resource scheduler.
//!
//! A run discovers resources carrying a schedule tag in every selected
//! account and zone, starts or stops them in one batch per kind, polls until
//! each reaches its target state, and reports one record per resource. The
//! pipeline is written against the [`ProviderSession`] interface; the
//! Scaleway implementation lives in [`scaleway`] and an in-memory cloud for
//! tests and demos in [`test_support`].

pub mod accounts;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod report;
pub mod retry;
pub mod scaleway;
pub mod telemetry;
pub mod test_support;
pub mod verifier;

pub use accounts::{AccountRegistry, AccountSelection, AccountsError, DEFAULT_ACCOUNT_NAME};
pub use config::{ConfigError, RunSettings, ScalewayConfig, SchedulerConfig};
pub use discovery::{DiscoveryError, ResourceDiscovery};
pub use executor::BatchActionExecutor;
pub use model::{
    Account, ActionFailure, ActionKind, ActionOutcome, ActionRequest, ActionSuccess,
    BatchOutcome, OutcomeStatus, Resource, ResourceKind, STATE_RUNNING, STATE_STOPPED,
    TagFilter, UnverifiedReason, VerificationOutcome,
};
pub use orchestrator::{AccountRegionOrchestrator, DEADLINE_EXCEEDED, PairListing, RunPlan};
pub use provider::{
    BatchResponse, ProviderError, ProviderFuture, ProviderSession, Rejection, SessionError,
    SessionFactory, StateTransition,
};
pub use report::{JsonLinesSink, MemorySink, ReportRecord, ResultSink, RunSummary, SinkError, Tally};
pub use retry::RetryPolicy;
pub use scaleway::{ScalewayProvider, ScalewaySession};
pub use telemetry::{LogFormat, RunLog, TelemetryError, init_subscriber};
pub use verifier::{PollWindow, StatePollingVerifier, VerificationReport};
