//! In-memory stand-in for the hosted platform, used by tests and local runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

use super::backend::{
    AuthProvider, BackendFactory, MembershipStore, ScopedBackend, StaticSessionProvider,
    AUTH_EVENT_CAPACITY,
};
use super::error::BackendError;
use crate::models::{
    AuthEvent, AuthEventKind, AuthSession, AuthUser, CommitteeMembership, Organization,
    OrganizationMembership,
};

/// Scripted failure for the next call on a given surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Never settles; only a caller-side timeout ends it.
    Hang,
    /// Fails fast with a 503.
    Unavailable,
    /// Drops the session, then fails like `Unavailable`.
    EndSession,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Counters {
    user: AtomicUsize,
    membership: AtomicUsize,
    organization: AtomicUsize,
    committee: AtomicUsize,
}

pub struct MockBackend {
    session: Mutex<Option<AuthSession>>,
    credentials: Mutex<HashMap<String, (String, AuthUser)>>,
    memberships: Mutex<Vec<OrganizationMembership>>,
    organizations: Mutex<HashMap<String, Organization>>,
    committees: Mutex<Vec<CommitteeMembership>>,
    user_faults: Mutex<VecDeque<MockFault>>,
    membership_faults: Mutex<VecDeque<MockFault>>,
    organization_faults: Mutex<VecDeque<MockFault>>,
    committee_faults: Mutex<VecDeque<MockFault>>,
    query_delay: Mutex<Option<Duration>>,
    counters: Counters,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            session: Mutex::new(None),
            credentials: Mutex::new(HashMap::new()),
            memberships: Mutex::new(Vec::new()),
            organizations: Mutex::new(HashMap::new()),
            committees: Mutex::new(Vec::new()),
            user_faults: Mutex::new(VecDeque::new()),
            membership_faults: Mutex::new(VecDeque::new()),
            organization_faults: Mutex::new(VecDeque::new()),
            committee_faults: Mutex::new(VecDeque::new()),
            query_delay: Mutex::new(None),
            counters: Counters::default(),
            events,
        }
    }

    pub fn set_session(&self, session: Option<AuthSession>) {
        *lock(&self.session) = session;
    }

    pub fn register_user(&self, email: &str, password: &str, user: AuthUser) {
        lock(&self.credentials).insert(email.to_string(), (password.to_string(), user));
    }

    pub fn add_membership(&self, membership: OrganizationMembership) {
        lock(&self.memberships).push(membership);
    }

    pub fn add_organization(&self, organization: Organization) {
        lock(&self.organizations).insert(organization.id.clone(), organization);
    }

    pub fn add_committee(&self, committee: CommitteeMembership) {
        lock(&self.committees).push(committee);
    }

    pub fn fail_user_lookups(&self, faults: impl IntoIterator<Item = MockFault>) {
        lock(&self.user_faults).extend(faults);
    }

    pub fn fail_membership_queries(&self, faults: impl IntoIterator<Item = MockFault>) {
        lock(&self.membership_faults).extend(faults);
    }

    pub fn fail_organization_queries(&self, faults: impl IntoIterator<Item = MockFault>) {
        lock(&self.organization_faults).extend(faults);
    }

    pub fn fail_committee_queries(&self, faults: impl IntoIterator<Item = MockFault>) {
        lock(&self.committee_faults).extend(faults);
    }

    /// Delay applied to every table query.
    pub fn set_query_delay(&self, delay: Option<Duration>) {
        *lock(&self.query_delay) = delay;
    }

    pub fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn user_lookups(&self) -> usize {
        self.counters.user.load(Ordering::SeqCst)
    }

    pub fn membership_queries(&self) -> usize {
        self.counters.membership.load(Ordering::SeqCst)
    }

    pub fn organization_queries(&self) -> usize {
        self.counters.organization.load(Ordering::SeqCst)
    }

    pub fn committee_queries(&self) -> usize {
        self.counters.committee.load(Ordering::SeqCst)
    }

    async fn before_query(&self, faults: &Mutex<VecDeque<MockFault>>) -> Result<(), BackendError> {
        let delay = *lock(&self.query_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.apply_fault(faults).await
    }

    async fn apply_fault(&self, faults: &Mutex<VecDeque<MockFault>>) -> Result<(), BackendError> {
        let fault = lock(faults).pop_front();
        match fault {
            None => Ok(()),
            Some(MockFault::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(MockFault::Unavailable) => Err(unavailable()),
            Some(MockFault::EndSession) => {
                self.set_session(None);
                Err(unavailable())
            }
        }
    }
}

fn unavailable() -> BackendError {
    BackendError::Status {
        status: 503,
        message: "mock backend unavailable".to_string(),
    }
}

#[async_trait]
impl AuthProvider for MockBackend {
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        Ok(lock(&self.session).clone())
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError> {
        self.counters.user.fetch_add(1, Ordering::SeqCst);
        self.apply_fault(&self.user_faults).await?;
        Ok(lock(&self.session).as_ref().map(|s| s.user.clone()))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let user = match lock(&self.credentials).get(email) {
            Some((expected, user)) if expected == password => user.clone(),
            _ => return Err(BackendError::InvalidCredentials),
        };
        let session = AuthSession::new(format!("mock-token-{}", user.id), user);
        self.set_session(Some(session.clone()));
        self.emit(AuthEvent::new(AuthEventKind::SignedIn, Some(session.clone())));
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<AuthSession, BackendError> {
        let refreshed = {
            let mut guard = lock(&self.session);
            let session = guard.as_mut().ok_or(BackendError::NoSession)?;
            session.access_token = format!("{}-refreshed", session.access_token);
            session.clone()
        };
        self.emit(AuthEvent::new(
            AuthEventKind::TokenRefreshed,
            Some(refreshed.clone()),
        ));
        Ok(refreshed)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_session(None);
        self.emit(AuthEvent::new(AuthEventKind::SignedOut, None));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl MembershipStore for MockBackend {
    async fn active_memberships(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> Result<Vec<OrganizationMembership>, BackendError> {
        self.counters.membership.fetch_add(1, Ordering::SeqCst);
        self.before_query(&self.membership_faults).await?;
        Ok(lock(&self.memberships)
            .iter()
            .filter(|m| m.user_id == user_id && m.is_active())
            .filter(|m| organization_id.map_or(true, |org| m.organization_id == org))
            .cloned()
            .collect())
    }

    async fn organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, BackendError> {
        self.counters.organization.fetch_add(1, Ordering::SeqCst);
        self.before_query(&self.organization_faults).await?;
        Ok(lock(&self.organizations).get(organization_id).cloned())
    }

    async fn committee_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CommitteeMembership>, BackendError> {
        self.counters.committee.fetch_add(1, Ordering::SeqCst);
        self.before_query(&self.committee_faults).await?;
        Ok(lock(&self.committees)
            .iter()
            .filter(|c| c.user_id == user_id && c.status.is_active())
            .cloned()
            .collect())
    }
}

impl BackendFactory for MockBackend {
    fn scoped(self: Arc<Self>, session: AuthSession) -> ScopedBackend {
        ScopedBackend {
            provider: Arc::new(StaticSessionProvider::new(Some(session))),
            store: self,
        }
    }
}
