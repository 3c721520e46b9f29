//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is an in-memory provider that implements [`SessionFactory`].
//! Resources live per account/region pair, state changes settle on a
//! scripted schedule, and every call is recorded for assertions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::model::{
    Account, ActionKind, Resource, ResourceKind, STATE_RUNNING, STATE_STOPPED, TagFilter,
};
use crate::provider::{
    BatchResponse, ProviderError, ProviderFuture, ProviderSession, Rejection, SessionError,
    SessionFactory, StateTransition,
};

/// Call observed by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// A session was requested.
    Open {
        /// Account identifier.
        account_id: String,
        /// Region.
        region: String,
    },
    /// A tagged listing was requested.
    FindTagged {
        /// Account identifier.
        account_id: String,
        /// Region.
        region: String,
        /// Kind listed.
        kind: ResourceKind,
    },
    /// A state query was issued.
    Describe {
        /// Account identifier.
        account_id: String,
        /// Region.
        region: String,
        /// Ids queried.
        ids: Vec<String>,
    },
    /// A batch start was issued.
    Start {
        /// Account identifier.
        account_id: String,
        /// Region.
        region: String,
        /// Ids addressed.
        ids: Vec<String>,
    },
    /// A batch stop was issued.
    Stop {
        /// Account identifier.
        account_id: String,
        /// Region.
        region: String,
        /// Ids addressed.
        ids: Vec<String>,
        /// Force flag as received.
        force: bool,
    },
}

/// Scripted resource held by [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeResource {
    resource: Resource,
    scripted_states: VecDeque<String>,
    pending_target: Option<String>,
    settle_after: Option<usize>,
    rejection: Option<String>,
    unreported: bool,
}

impl FakeResource {
    /// Creates an instance in `state`.
    #[must_use]
    pub fn instance(id: &str, state: &str) -> Self {
        Self::new(id, ResourceKind::Instance, state)
    }

    /// Creates a node group in `state`.
    #[must_use]
    pub fn node_group(id: &str, state: &str) -> Self {
        Self::new(id, ResourceKind::NodeGroup, state)
    }

    fn new(id: &str, kind: ResourceKind, state: &str) -> Self {
        Self {
            resource: Resource {
                id: id.to_owned(),
                kind,
                name: format!("{id}-name"),
                current_state: state.to_owned(),
                tags: BTreeMap::new(),
            },
            scripted_states: VecDeque::new(),
            pending_target: None,
            settle_after: Some(0),
            rejection: None,
            unreported: false,
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.resource.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Overrides the display name.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.resource.name = name.to_owned();
        self
    }

    /// Makes the provider reject actions on this resource with `reason`.
    #[must_use]
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_owned());
        self
    }

    /// Makes the provider leave this resource out of batch answers.
    #[must_use]
    pub const fn unreported(mut self) -> Self {
        self.unreported = true;
        self
    }

    /// Reports the transitional state for `polls` describes before settling.
    #[must_use]
    pub const fn settles_after(mut self, polls: usize) -> Self {
        self.settle_after = Some(polls);
        self
    }

    /// Keeps the resource in its transitional state forever.
    #[must_use]
    pub const fn never_settles(mut self) -> Self {
        self.settle_after = None;
        self
    }

    /// Scripts the states returned by successive describes, ahead of any
    /// settling behaviour.
    #[must_use]
    pub fn describe_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripted_states = states.into_iter().map(Into::into).collect();
        self
    }

    fn observe(&mut self) -> String {
        if let Some(state) = self.scripted_states.pop_front() {
            self.resource.current_state = state;
        } else if let Some(target) = self.pending_target.clone() {
            match self.settle_after {
                Some(0) => {
                    self.resource.current_state = target;
                    self.pending_target = None;
                }
                Some(remaining) => self.settle_after = Some(remaining - 1),
                None => {}
            }
        }
        self.resource.current_state.clone()
    }
}

#[derive(Debug, Default)]
struct PairState {
    resources: Vec<FakeResource>,
    discovery_error: Option<ProviderError>,
    batch_error: Option<ProviderError>,
    describe_error: Option<ProviderError>,
}

#[derive(Debug)]
struct CloudState {
    pairs: BTreeMap<(String, String), PairState>,
    session_errors: BTreeMap<String, ProviderError>,
    provider_filtering: bool,
    throttle_remaining: usize,
    calls: Vec<ProviderCall>,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            pairs: BTreeMap::new(),
            session_errors: BTreeMap::new(),
            provider_filtering: true,
            throttle_remaining: 0,
            calls: Vec::new(),
        }
    }
}

impl CloudState {
    fn pair_mut(&mut self, account_id: &str, region: &str) -> &mut PairState {
        self.pairs
            .entry((account_id.to_owned(), region.to_owned()))
            .or_default()
    }

    fn take_throttle(&mut self) -> Result<(), ProviderError> {
        if self.throttle_remaining == 0 {
            return Ok(());
        }
        self.throttle_remaining -= 1;
        Err(ProviderError::Throttled {
            message: String::from("rate exceeded"),
        })
    }
}

/// In-memory provider used by tests and the CLI demo mode.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloud with two accounts and a few tagged instances, used by the CLI
    /// demo mode.
    #[must_use]
    pub fn demo(tag_key: &str, tag_value: &str, region: &str) -> Self {
        let cloud = Self::new();
        cloud.add_resource(
            "proj-prod",
            region,
            FakeResource::instance("srv-prod-1", STATE_RUNNING)
                .named("prod-web")
                .tag(tag_key, tag_value),
        );
        cloud.add_resource(
            "proj-prod",
            region,
            FakeResource::instance("srv-prod-2", STATE_STOPPED)
                .named("prod-worker")
                .tag(tag_key, tag_value),
        );
        cloud.add_resource(
            "proj-dev",
            region,
            FakeResource::instance("srv-dev-1", STATE_RUNNING)
                .named("dev-sandbox")
                .tag(tag_key, tag_value),
        );
        cloud
    }

    /// Accounts known to [`FakeCloud::demo`].
    #[must_use]
    pub fn demo_accounts() -> Vec<Account> {
        vec![
            Account::new("prod", "proj-prod"),
            Account::new("dev", "proj-dev"),
        ]
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a resource in an account/region pair.
    pub fn add_resource(&self, account_id: &str, region: &str, resource: FakeResource) {
        self.lock()
            .pair_mut(account_id, region)
            .resources
            .push(resource);
    }

    /// Makes every session for `account_id` fail to open.
    pub fn fail_sessions(&self, account_id: &str, error: ProviderError) {
        self.lock()
            .session_errors
            .insert(account_id.to_owned(), error);
    }

    /// Makes tagged listings fail in one pair.
    pub fn fail_discovery(&self, account_id: &str, region: &str, error: ProviderError) {
        self.lock().pair_mut(account_id, region).discovery_error = Some(error);
    }

    /// Makes batch start/stop calls fail outright in one pair.
    pub fn fail_batches(&self, account_id: &str, region: &str, error: ProviderError) {
        self.lock().pair_mut(account_id, region).batch_error = Some(error);
    }

    /// Makes state queries fail in one pair.
    pub fn fail_describes(&self, account_id: &str, region: &str, error: ProviderError) {
        self.lock().pair_mut(account_id, region).describe_error = Some(error);
    }

    /// Throttles the next `count` session calls of any kind.
    pub fn throttle_next_calls(&self, count: usize) {
        self.lock().throttle_remaining = count;
    }

    /// Returns every resource of the kind from tagged listings, ignoring the
    /// tag filter, so client-side filtering can be observed.
    pub fn disable_provider_filtering(&self) {
        self.lock().provider_filtering = false;
    }

    /// Snapshot of all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Id lists passed to every describe call, in order.
    #[must_use]
    pub fn describe_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Describe { ids, .. } => Some(ids),
                _ => None,
            })
            .collect()
    }

    /// Force flags received by every stop call, in order.
    #[must_use]
    pub fn stop_forces(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Stop { force, .. } => Some(force),
                _ => None,
            })
            .collect()
    }

    /// Current state of a resource, if registered.
    #[must_use]
    pub fn state_of(&self, account_id: &str, region: &str, resource_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .pairs
            .get(&(account_id.to_owned(), region.to_owned()))?
            .resources
            .iter()
            .find(|fake| fake.resource.id == resource_id)
            .map(|fake| fake.resource.current_state.clone())
    }
}

/// Session handed out by [`FakeCloud`].
#[derive(Clone, Debug)]
pub struct FakeSession {
    cloud: FakeCloud,
    account_id: String,
    region: String,
}

impl FakeSession {
    fn find_tagged_now(
        &self,
        kind: ResourceKind,
        filter: &TagFilter,
    ) -> Result<Vec<Resource>, ProviderError> {
        let mut state = self.cloud.lock();
        state.calls.push(ProviderCall::FindTagged {
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            kind,
        });
        state.take_throttle()?;
        let filtering = state.provider_filtering;
        let pair = state.pair_mut(&self.account_id, &self.region);
        if let Some(err) = pair.discovery_error.clone() {
            return Err(err);
        }
        Ok(pair
            .resources
            .iter()
            .filter(|fake| fake.resource.kind == kind)
            .filter(|fake| !filtering || filter.matches(&fake.resource.tags))
            .map(|fake| fake.resource.clone())
            .collect())
    }

    fn describe_now(
        &self,
        kind: ResourceKind,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut state = self.cloud.lock();
        state.calls.push(ProviderCall::Describe {
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            ids: ids.to_vec(),
        });
        state.take_throttle()?;
        let pair = state.pair_mut(&self.account_id, &self.region);
        if let Some(err) = pair.describe_error.clone() {
            return Err(err);
        }
        let wanted: BTreeSet<&String> = ids.iter().collect();
        Ok(pair
            .resources
            .iter_mut()
            .filter(|fake| fake.resource.kind == kind && wanted.contains(&fake.resource.id))
            .map(|fake| (fake.resource.id.clone(), fake.observe()))
            .collect())
    }

    fn act_now(
        &self,
        kind: ResourceKind,
        ids: &[String],
        action: ActionKind,
        force: bool,
    ) -> Result<BatchResponse, ProviderError> {
        let mut state = self.cloud.lock();
        let call = match action {
            ActionKind::Start => ProviderCall::Start {
                account_id: self.account_id.clone(),
                region: self.region.clone(),
                ids: ids.to_vec(),
            },
            ActionKind::Stop => ProviderCall::Stop {
                account_id: self.account_id.clone(),
                region: self.region.clone(),
                ids: ids.to_vec(),
                force,
            },
        };
        state.calls.push(call);
        state.take_throttle()?;
        let pair = state.pair_mut(&self.account_id, &self.region);
        if let Some(err) = pair.batch_error.clone() {
            return Err(err);
        }

        let target = action.target_state();
        let transitional = match action {
            ActionKind::Start => "starting",
            ActionKind::Stop => "stopping",
        };
        let mut response = BatchResponse::default();
        for id in ids {
            let Some(fake) = pair
                .resources
                .iter_mut()
                .find(|fake| fake.resource.kind == kind && fake.resource.id == *id)
            else {
                response.rejected.push(Rejection {
                    resource_id: id.clone(),
                    previous_state: None,
                    reason: format!("resource {id} not found"),
                });
                continue;
            };
            if fake.unreported {
                continue;
            }
            let previous = fake.resource.current_state.clone();
            if let Some(reason) = fake.rejection.clone() {
                response.rejected.push(Rejection {
                    resource_id: id.clone(),
                    previous_state: Some(previous),
                    reason,
                });
                continue;
            }
            if previous != target {
                fake.resource.current_state = transitional.to_owned();
                fake.pending_target = Some(target.to_owned());
            }
            response.transitioned.push(StateTransition {
                resource_id: id.clone(),
                previous_state: previous,
                current_state: fake.resource.current_state.clone(),
            });
        }
        Ok(response)
    }
}

impl ProviderSession for FakeSession {
    fn find_tagged<'a>(
        &'a self,
        kind: ResourceKind,
        filter: &'a TagFilter,
    ) -> ProviderFuture<'a, Vec<Resource>> {
        Box::pin(async move { self.find_tagged_now(kind, filter) })
    }

    fn describe<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BTreeMap<String, String>> {
        Box::pin(async move { self.describe_now(kind, resource_ids) })
    }

    fn start<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
    ) -> ProviderFuture<'a, BatchResponse> {
        Box::pin(async move { self.act_now(kind, resource_ids, ActionKind::Start, false) })
    }

    fn stop<'a>(
        &'a self,
        kind: ResourceKind,
        resource_ids: &'a [String],
        force: bool,
    ) -> ProviderFuture<'a, BatchResponse> {
        Box::pin(async move { self.act_now(kind, resource_ids, ActionKind::Stop, force) })
    }
}

impl SessionFactory for FakeCloud {
    type Session = FakeSession;

    fn open<'a>(
        &'a self,
        account: &'a Account,
        region: &'a str,
    ) -> ProviderFuture<'a, Self::Session, SessionError> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(ProviderCall::Open {
                account_id: account.account_id.clone(),
                region: region.to_owned(),
            });
            if let Some(source) = state.session_errors.get(&account.account_id).cloned() {
                return Err(SessionError {
                    account: account.name.clone(),
                    region: region.to_owned(),
                    source,
                });
            }
            drop(state);
            Ok(FakeSession {
                cloud: self.clone(),
                account_id: account.account_id.clone(),
                region: region.to_owned(),
            })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain(..).rev() {
            match value {
                // SAFETY: The guard still holds `ENV_LOCK`.
                Some(old) => unsafe { env::set_var(&key, old) },
                // SAFETY: The guard still holds `ENV_LOCK`.
                None => unsafe { env::remove_var(&key) },
            }
        }
    }
}
