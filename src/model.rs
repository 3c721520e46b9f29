//! Domain types shared by the discovery, action, and verification pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cloud account (a Scaleway project) addressed by the scheduler.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Account {
    /// Human-friendly name used for selection and reporting.
    pub name: String,
    /// Provider identifier; the identity key for the account.
    pub account_id: String,
}

impl Account {
    /// Creates an account from a name and provider identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
        }
    }
}

/// Kind of compute resource managed by the scheduler.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Virtual machine instance.
    Instance,
    /// Managed Kubernetes node group.
    NodeGroup,
}

impl ResourceKind {
    /// Returns the stable textual form used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::NodeGroup => "node-group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a textual kind or action cannot be parsed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown {what} '{value}'")]
pub struct ParseModelError {
    what: &'static str,
    value: String,
}

impl FromStr for ResourceKind {
    type Err = ParseModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "instance" | "instances" => Ok(Self::Instance),
            "node-group" | "node-groups" | "nodegroup" | "pool" => Ok(Self::NodeGroup),
            other => Err(ParseModelError {
                what: "resource kind",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lifecycle action applied to discovered resources.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Power resources on.
    Start,
    /// Power resources off.
    Stop,
}

impl ActionKind {
    /// Returns the state a resource reaches once the action completes.
    #[must_use]
    pub const fn target_state(self) -> &'static str {
        match self {
            Self::Start => STATE_RUNNING,
            Self::Stop => STATE_STOPPED,
        }
    }

    /// Returns the stable textual form used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ParseModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(ParseModelError {
                what: "action",
                value: other.to_owned(),
            }),
        }
    }
}

/// Normalised state of a powered-on resource.
pub const STATE_RUNNING: &str = "running";
/// Normalised state of a powered-off resource.
pub const STATE_STOPPED: &str = "stopped";

/// Exact-match tag predicate used for discovery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagFilter {
    /// Tag key that must be present.
    pub key: String,
    /// Value the key must carry.
    pub value: String,
}

impl TagFilter {
    /// Builds a filter, trimming surrounding whitespace.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into().trim().to_owned(),
            value: value.into().trim().to_owned(),
        }
    }

    /// Returns true when `tags` carries exactly this key/value pair.
    #[must_use]
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key).is_some_and(|value| *value == self.value)
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Snapshot of a discovered resource. The state is not live.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Resource {
    /// Identifier, unique within a region.
    pub id: String,
    /// Kind of resource.
    pub kind: ResourceKind,
    /// Display name.
    pub name: String,
    /// State observed at discovery time.
    pub current_state: String,
    /// Tag map with unique keys.
    pub tags: BTreeMap<String, String>,
}

/// Request to apply one action to a set of resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionRequest {
    resource_ids: Vec<String>,
    action: ActionKind,
    force: bool,
}

impl ActionRequest {
    /// Builds a start request. Duplicate ids are dropped, keeping the first.
    #[must_use]
    pub fn start<I, S>(resource_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(resource_ids, ActionKind::Start, false)
    }

    /// Builds a stop request carrying the caller's `force` flag.
    #[must_use]
    pub fn stop<I, S>(resource_ids: I, force: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(resource_ids, ActionKind::Stop, force)
    }

    /// Builds a request for `action`; `force` is ignored for starts.
    #[must_use]
    pub fn new<I, S>(resource_ids: I, action: ActionKind, force: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let ids = resource_ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self {
            resource_ids: ids,
            action,
            force: matches!(action, ActionKind::Stop) && force,
        }
    }

    /// Unique ids in request order.
    #[must_use]
    pub fn resource_ids(&self) -> &[String] {
        &self.resource_ids
    }

    /// Requested action.
    #[must_use]
    pub const fn action(&self) -> ActionKind {
        self.action
    }

    /// Force flag (always false for starts).
    #[must_use]
    pub const fn force(&self) -> bool {
        self.force
    }
}

/// Outcome status of one action or record.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The state change completed (and was verified when requested).
    Succeeded,
    /// The state change was rejected or could not be attempted.
    Failed,
    /// The state change was accepted but not observed before the deadline.
    TimedOut,
}

impl OutcomeStatus {
    /// Returns true for [`OutcomeStatus::Succeeded`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A resource that accepted the requested action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionSuccess {
    /// Resource identifier.
    pub resource_id: String,
    /// State before the call.
    pub previous_state: String,
    /// State reported right after the call.
    pub resulting_state: String,
}

/// A resource that did not accept the requested action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionFailure {
    /// Resource identifier.
    pub resource_id: String,
    /// State before the call, when the provider reported it.
    pub previous_state: Option<String>,
    /// Provider-supplied reason.
    pub error: String,
}

/// Per-resource result of an action request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionOutcome {
    /// See [`ActionSuccess`].
    Succeeded(ActionSuccess),
    /// See [`ActionFailure`].
    Failed(ActionFailure),
}

impl ActionOutcome {
    /// Identifier of the resource this outcome belongs to.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Succeeded(success) => &success.resource_id,
            Self::Failed(failure) => &failure.resource_id,
        }
    }

    /// Status of the outcome.
    #[must_use]
    pub const fn status(&self) -> OutcomeStatus {
        match self {
            Self::Succeeded(_) => OutcomeStatus::Succeeded,
            Self::Failed(_) => OutcomeStatus::Failed,
        }
    }
}

/// Partitioned result of one batch action. Holds exactly one entry per
/// requested id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchOutcome {
    /// Resources that transitioned.
    pub succeeded: Vec<ActionSuccess>,
    /// Resources that were rejected or never attempted.
    pub failed: Vec<ActionFailure>,
}

impl BatchOutcome {
    /// Number of outcomes held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true when no outcomes are held.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    /// Iterates over all outcomes, successes first.
    pub fn outcomes(&self) -> impl Iterator<Item = ActionOutcome> + '_ {
        self.succeeded
            .iter()
            .cloned()
            .map(ActionOutcome::Succeeded)
            .chain(self.failed.iter().cloned().map(ActionOutcome::Failed))
    }
}

/// Why a resource could not be verified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnverifiedReason {
    /// The target state was not observed inside the window.
    TimedOut,
    /// The provider stopped reporting the resource.
    Missing,
    /// State polling hit a terminal provider fault.
    Provider(String),
}

impl fmt::Display for UnverifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => f.write_str("timed_out"),
            Self::Missing => f.write_str("resource no longer reported by provider"),
            Self::Provider(message) => write!(f, "state query failed: {message}"),
        }
    }
}

/// Per-resource result of state verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationOutcome {
    /// The target state was observed.
    Verified {
        /// Resource identifier.
        resource_id: String,
        /// Observed state (equal to the target).
        state: String,
    },
    /// The target state was not observed.
    Unverified {
        /// Resource identifier.
        resource_id: String,
        /// Last state seen while polling, if any.
        last_state: Option<String>,
        /// Why verification stopped.
        reason: UnverifiedReason,
    },
}

impl VerificationOutcome {
    /// Identifier of the resource this outcome belongs to.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Verified { resource_id, .. } | Self::Unverified { resource_id, .. } => {
                resource_id
            }
        }
    }

    /// Maps the outcome onto a record status.
    #[must_use]
    pub const fn status(&self) -> OutcomeStatus {
        match self {
            Self::Verified { .. } => OutcomeStatus::Succeeded,
            Self::Unverified {
                reason: UnverifiedReason::TimedOut,
                ..
            } => OutcomeStatus::TimedOut,
            Self::Unverified { .. } => OutcomeStatus::Failed,
        }
    }
}
