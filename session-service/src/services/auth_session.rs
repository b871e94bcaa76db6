//! Lifecycle of the signed-in user.
//!
//! The manager follows the provider's auth events, runs one load at a time
//! (role resolution joined with committee loading) and publishes the result
//! on a `watch` channel. Nothing here returns an error to subscribers: a
//! failure leaves the last good state in place with `loading` cleared.

use serde::Serialize;
use service_core::utils::with_timeout;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::backend::AuthProvider;
use super::committees::CommitteeLoader;
use super::error::BackendError;
use super::metrics;
use super::role_resolver::RoleResolver;
use super::supervisor::{Admission, BusyPolicy, LoadSupervisor};
use crate::config::ResolutionConfig;
use crate::models::{AuthEvent, AuthEventKind, AuthSession, AuthUser, CommitteeMembership, Member};

/// Snapshot published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub member: Option<Member>,
    pub committees: Vec<CommitteeMembership>,
    pub loading: bool,
    pub initialized: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            member: None,
            committees: Vec::new(),
            loading: true,
            initialized: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionTimings {
    /// Deadline for each provider call made by the manager itself.
    pub query_timeout: Duration,
    /// After this long, `loading` is cleared whatever happened.
    pub safety_timeout: Duration,
    pub recheck_delay: Duration,
    pub recheck_attempts: u32,
    pub busy_policy: BusyPolicy,
}

impl From<&ResolutionConfig> for SessionTimings {
    fn from(config: &ResolutionConfig) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            safety_timeout: Duration::from_secs(config.safety_timeout_secs),
            recheck_delay: Duration::from_millis(config.recheck_delay_ms),
            recheck_attempts: config.recheck_attempts,
            busy_policy: if config.coalesce_loads {
                BusyPolicy::Coalesce
            } else {
                BusyPolicy::Drop
            },
        }
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self::from(&ResolutionConfig::default())
    }
}

pub struct AuthSessionManager {
    provider: Arc<dyn AuthProvider>,
    resolver: RoleResolver,
    committees: CommitteeLoader,
    timings: SessionTimings,
    supervisor: Arc<LoadSupervisor<(AuthUser, u64)>>,
    state: watch::Sender<AuthState>,
    /// Bumped on sign-out. Work is stamped with the value current when its
    /// event arrived and is discarded once the two differ.
    epoch: AtomicU64,
    detached: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthSessionManager {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        resolver: RoleResolver,
        committees: CommitteeLoader,
        timings: SessionTimings,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(AuthState::default());
        Arc::new(Self {
            provider,
            resolver,
            committees,
            supervisor: LoadSupervisor::new(timings.busy_policy),
            timings,
            state,
            epoch: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Arm the safety timer, follow provider events and load the current user.
    pub async fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let safety_timeout = self.timings.safety_timeout;
        self.track(tokio::spawn(async move {
            tokio::time::sleep(safety_timeout).await;
            if let Some(manager) = weak.upgrade() {
                manager.force_not_loading("safety timeout elapsed");
            }
        }));

        // Subscribe first so no event slips in between the user check and the loop.
        let events = self.provider.subscribe();
        self.track(tokio::spawn(follow_events(Arc::downgrade(self), events)));

        let epoch = self.epoch();
        match with_timeout(self.timings.query_timeout, self.provider.get_user()).await {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Existing session found on start");
                self.run_load(user, epoch).await;
            }
            Ok(None) => debug!("No session on start"),
            Err(e) => warn!(error = %e, "Session check on start failed"),
        }

        let busy = self.supervisor.is_busy();
        self.state.send_modify(|s| {
            s.initialized = true;
            s.loading = busy;
        });
    }

    /// Process one event. Failures inside the handler, panics included, are
    /// logged and end with `loading` cleared.
    pub async fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        let kind = event.kind;
        let epoch = self.epoch();
        let manager = Arc::clone(self);
        let outcome = tokio::spawn(async move { manager.process_event(event, epoch).await }).await;

        if let Err(e) = outcome {
            self.handler_failed(Some(kind), &e);
        }
    }

    fn handler_failed(&self, kind: Option<AuthEventKind>, err: &JoinError) {
        let kind = kind.map_or("unknown", |k| k.as_str());
        error!(event = kind, error = %err, "Auth event handler failed");
        metrics::record_auth_event(kind, "failed");
        self.force_not_loading("event handler failed");
    }

    async fn process_event(self: Arc<Self>, event: AuthEvent, epoch: u64) {
        let kind = event.kind;
        info!(event = kind.as_str(), user_id = ?event.user().map(|u| &u.id), "Auth event");

        match kind {
            AuthEventKind::InitialSession => {
                let current = self.current();
                if current.initialized || current.user.is_some() {
                    debug!("Initial session already handled");
                    metrics::record_auth_event(kind.as_str(), "ignored");
                    return;
                }
                match event.session {
                    Some(session) => self.run_load(session.user, epoch).await,
                    None => self.state.send_modify(|s| s.loading = false),
                }
            }
            AuthEventKind::SignedIn => {
                let Some(user) = event.session.map(|s| s.user) else {
                    warn!("SIGNED_IN without a session");
                    return;
                };
                if self.current_user_id().as_deref() == Some(user.id.as_str()) {
                    debug!(user_id = %user.id, "Already loaded, ignoring sign-in");
                    metrics::record_auth_event(kind.as_str(), "ignored");
                    return;
                }
                self.run_load(user, epoch).await;
            }
            AuthEventKind::TokenRefreshed | AuthEventKind::UserUpdated => {
                match event.session.map(|s| s.user) {
                    Some(user) => self.run_load(user, epoch).await,
                    None => warn!(event = kind.as_str(), "Event without a session"),
                }
            }
            AuthEventKind::SignedOut => self.clear_local().await,
        }

        metrics::record_auth_event(kind.as_str(), "handled");
    }

    async fn run_load(self: &Arc<Self>, user: AuthUser, epoch: u64) {
        let (mut slot, (mut user, mut epoch)) = match self.supervisor.try_acquire((user, epoch)) {
            Admission::Acquired(slot, load) => (slot, load),
            Admission::Dropped => {
                info!("Load already in flight, dropping this one");
                metrics::record_load("dropped");
                return;
            }
            Admission::Deferred => {
                debug!("Load already in flight, deferring");
                metrics::record_load("deferred");
                return;
            }
        };

        loop {
            if self.begin_load(&user, epoch) {
                self.load_user_data(&user, epoch).await;
            } else {
                debug!(user_id = %user.id, "Session ended before its load started");
                metrics::record_load("stale");
            }

            match slot.next_deferred() {
                Some((next, next_epoch)) => {
                    user = next;
                    epoch = next_epoch;
                }
                None => break,
            }
        }
    }

    /// Publish the user as loading. Returns false when the session already ended.
    fn begin_load(&self, user: &AuthUser, epoch: u64) -> bool {
        self.state.send_if_modified(|s| {
            if self.is_stale(epoch) {
                return false;
            }
            if s.user.as_ref().map(|u| &u.id) != Some(&user.id) {
                s.member = None;
                s.committees.clear();
            }
            s.user = Some(user.clone());
            s.loading = true;
            true
        })
    }

    async fn load_user_data(self: &Arc<Self>, user: &AuthUser, epoch: u64) {
        let is_current = || !self.is_stale(epoch);
        let (role, committees) = tokio::join!(
            self.resolver.resolve_while(&user.id, None, &is_current),
            self.committees.load(&user.id)
        );

        if self.is_stale(epoch) {
            self.discard_stale(&user.id).await;
            return;
        }

        let committees = committees.map_err(|e| {
            warn!(user_id = %user.id, error = %e, "Committee load failed");
        });
        let needs_recheck = role.is_none();

        let published = self.state.send_if_modified(|s| {
            if self.is_stale(epoch) {
                return false;
            }
            let same_user = s.member.as_ref().is_some_and(|m| m.id == user.id);
            let access = match role {
                Some(resolved) => Some(resolved),
                None if same_user => s.member.as_ref().and_then(|m| m.access.clone()),
                None => None,
            };
            s.committees = match committees {
                Ok(list) => list,
                Err(()) if same_user => std::mem::take(&mut s.committees),
                Err(()) => Vec::new(),
            };
            s.member = Some(Member::new(user, access));
            s.user = Some(user.clone());
            s.loading = false;
            true
        });
        if !published {
            self.discard_stale(&user.id).await;
            return;
        }
        metrics::record_load("completed");

        if needs_recheck {
            self.schedule_recheck(user.clone(), epoch);
        }
    }

    /// One delayed retry for a membership row that may not be committed yet.
    fn schedule_recheck(self: &Arc<Self>, user: AuthUser, epoch: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.timings.recheck_delay;
        let attempts = self.timings.recheck_attempts;
        debug!(user_id = %user.id, delay_ms = delay.as_millis() as u64, "Scheduling role recheck");

        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = weak.upgrade() else { return };
            if manager.is_stale(epoch) {
                return;
            }

            let is_current = || !manager.is_stale(epoch);
            let resolved = manager
                .resolver
                .resolve_while(&user.id, Some(attempts), &is_current)
                .await;

            if manager.is_stale(epoch) {
                manager.discard_stale(&user.id).await;
                return;
            }
            let Some(resolved) = resolved else {
                info!(user_id = %user.id, "Role still unresolved after recheck");
                return;
            };

            manager.state.send_if_modified(|s| match s.member.as_mut() {
                Some(member) if member.id == user.id && !manager.is_stale(epoch) => {
                    info!(user_id = %user.id, role = %resolved.role, "Role resolved on recheck");
                    member.access = Some(resolved);
                    true
                }
                _ => false,
            });
        }));
    }

    /// Forget the user locally. Never touches the network.
    pub async fn clear_local(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.user = None;
            s.member = None;
            s.committees.clear();
            s.loading = false;
            s.initialized = true;
        });
        self.resolver.invalidate_all().await;
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        with_timeout(
            self.timings.query_timeout,
            self.provider.sign_in_with_password(email, password),
        )
        .await
    }

    pub async fn sign_out(&self) -> Result<(), BackendError> {
        self.clear_local().await;
        with_timeout(self.timings.query_timeout, self.provider.sign_out()).await
    }

    pub async fn refresh(&self) -> Result<AuthSession, BackendError> {
        with_timeout(self.timings.query_timeout, self.provider.refresh_session()).await
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Stop following events; in-flight loads no longer publish.
    pub fn shutdown(&self) {
        self.detached.store(true, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Drop the results of a lookup that outlived its session. A cookie
    /// written in the gap before sign-out took effect goes with them.
    async fn discard_stale(&self, user_id: &str) {
        debug!(user_id, "Discarding load for a session that ended");
        metrics::record_load("stale");

        let signed_out = self.state.borrow().user.is_none();
        if signed_out && !self.is_detached() {
            self.resolver.invalidate_all().await;
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.is_detached() || self.epoch.load(Ordering::SeqCst) != epoch
    }

    fn current_user_id(&self) -> Option<String> {
        self.state.borrow().user.as_ref().map(|u| u.id.clone())
    }

    fn force_not_loading(&self, reason: &str) {
        self.state.send_if_modified(|s| {
            if s.loading {
                warn!(reason, "Clearing stuck loading flag");
                s.loading = false;
                true
            } else {
                false
            }
        });
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }
}

/// Receive loop. Each event runs in its own task so a slow load never holds up
/// a sign-out; the epoch is read on receipt, before any of them run.
async fn follow_events(
    manager: Weak<AuthSessionManager>,
    mut events: broadcast::Receiver<AuthEvent>,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let Some(strong) = manager.upgrade() else { break };
                    if strong.is_detached() {
                        break;
                    }
                    let epoch = strong.epoch();
                    handlers.spawn(async move { strong.process_event(event, epoch).await });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                report_handler(&manager, finished);
            }
        }
    }

    while let Some(finished) = handlers.join_next().await {
        report_handler(&manager, finished);
    }
    debug!("Auth event loop stopped");
}

fn report_handler(manager: &Weak<AuthSessionManager>, finished: Result<(), JoinError>) {
    if let (Err(e), Some(manager)) = (finished, manager.upgrade()) {
        manager.handler_failed(None, &e);
    }
}
