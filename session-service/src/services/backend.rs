//! Seams to the hosted platform: the auth provider that owns sessions and
//! the policy-protected tables holding memberships.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::error::BackendError;
use crate::models::{
    AuthEvent, AuthSession, AuthUser, CommitteeMembership, Organization, OrganizationMembership,
};

/// Capacity of auth event channels; slow subscribers see `Lagged`.
pub const AUTH_EVENT_CAPACITY: usize = 32;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Locally held session, if any. Never hits the network.
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError>;

    /// Validate the session against the provider and return its user.
    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError>;

    async fn refresh_session(&self) -> Result<AuthSession, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Rows with `estado = activo` for the user, optionally limited to one
    /// organization.
    async fn active_memberships(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> Result<Vec<OrganizationMembership>, BackendError>;

    async fn organization(&self, organization_id: &str)
        -> Result<Option<Organization>, BackendError>;

    async fn committee_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CommitteeMembership>, BackendError>;
}

/// Provider and store acting on behalf of one session.
#[derive(Clone)]
pub struct ScopedBackend {
    pub provider: Arc<dyn AuthProvider>,
    pub store: Arc<dyn MembershipStore>,
}

/// Builds request-scoped backends from a bearer session.
pub trait BackendFactory: Send + Sync {
    fn scoped(self: Arc<Self>, session: AuthSession) -> ScopedBackend;
}

/// Provider over a session that was established elsewhere (e.g. a bearer
/// token on an incoming request). It never emits events.
pub struct StaticSessionProvider {
    session: Option<AuthSession>,
    events: broadcast::Sender<AuthEvent>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<AuthSession>) -> Self {
        let (events, _) = broadcast::channel(1);
        Self { session, events }
    }
}

#[async_trait]
impl AuthProvider for StaticSessionProvider {
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        Ok(self.session.clone())
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError> {
        Ok(self.session.as_ref().map(|s| s.user.clone()))
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<AuthSession, BackendError> {
        Err(BackendError::Internal(anyhow::anyhow!(
            "Static sessions cannot sign in"
        )))
    }

    async fn refresh_session(&self) -> Result<AuthSession, BackendError> {
        self.session.clone().ok_or(BackendError::NoSession)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
