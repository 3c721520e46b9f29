//! Provider abstraction consumed by the scheduling pipeline.
//!
//! A [`SessionFactory`] opens one [`ProviderSession`] per account/region pair.
//! Sessions expose the four calls the pipeline needs and report faults through
//! the closed [`ProviderError`] set; raw SDK errors are classified by the
//! implementation and never reach the core.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{Account, Resource, ResourceKind, TagFilter};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E = ProviderError> =
    Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Closed classification of provider faults.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Credentials were rejected or lack permission.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Provider message.
        message: String,
    },
    /// The provider rate-limited the call.
    #[error("throttled: {message}")]
    Throttled {
        /// Provider message.
        message: String,
    },
    /// The addressed resource or scope does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Provider message.
        message: String,
    },
    /// Connectivity failure or provider-side outage.
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Transport or provider message.
        message: String,
    },
    /// The provider refused the call for a permanent reason.
    #[error("rejected: {message}")]
    Rejected {
        /// Provider message.
        message: String,
    },
    /// The provider answered with a payload that could not be decoded.
    #[error("malformed response: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },
}

impl ProviderError {
    /// Returns true for faults worth retrying with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unavailable { .. })
    }

    /// Short label used in structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::Throttled { .. } => "throttled",
            Self::NotFound { .. } => "not_found",
            Self::Unavailable { .. } => "unavailable",
            Self::Rejected { .. } => "rejected",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Raised when a session cannot be opened for an account/region pair.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("cannot open session for account {account} in {region}: {source}")]
pub struct SessionError {
    /// Account name.
    pub account: String,
    /// Region or zone.
    pub region: String,
    /// Classified provider fault.
    #[source]
    pub source: ProviderError,
}

/// A resource that the provider reports as having accepted an action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateTransition {
    /// Resource identifier.
    pub resource_id: String,
    /// State before the call.
    pub previous_state: String,
    /// State right after the call.
    pub current_state: String,
}

/// A resource that the provider refused to act on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rejection {
    /// Resource identifier.
    pub resource_id: String,
    /// State before the call, when known.
    pub previous_state: Option<String>,
    /// Provider-supplied reason.
    pub reason: String,
}

/// Raw provider answer to a batch start or stop call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchResponse {
    /// Resources that transitioned.
    pub transitioned: Vec<StateTransition>,
    /// Resources that did not.
    pub rejected: Vec<Rejection>,
}

/// Provider operations available inside one account/region pair.
pub trait ProviderSession: Send + Sync {
    /// Lists resources of `kind` carrying the tag pair.
    fn find_tagged<'a>(
        &'a self,
        kind: ResourceKind,
        filter: &'a TagFilter,
    ) -> ProviderFuture<'a, Vec<Resource>>;

    /// Returns the current state of each id the provider still knows about.
    fn describe<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BTreeMap<String, String>>;

    /// Starts every id in one batch call.
    fn start<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BatchResponse>;

    /// Stops every id in one batch call, forwarding `force` untouched.
    fn stop<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
        force: bool,
    ) -> ProviderFuture<'a, BatchResponse>;
}

/// Opens provider sessions scoped to one account and region.
pub trait SessionFactory: Send + Sync {
    /// Session type produced by this factory.
    type Session: ProviderSession + 'static;

    /// Establishes a session for the pair.
    fn open<'a>(
        &'a self,
        account: &'a Account,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Session, SessionError>;
}
