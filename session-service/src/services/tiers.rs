//! Role sources, fastest first: session claims, the cookie cache, then the
//! membership table. Each tier answers `try_get`; a tier that can store a
//! value found further down the chain overrides `set`.

use async_trait::async_trait;
use service_core::utils::{with_retry, RetryPolicy};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{AuthProvider, MembershipStore};
use super::claims::ClaimsDecoder;
use super::cookies::AuthCookies;
use super::error::BackendError;
use crate::models::{MembershipStatus, OrgRoleClaim, ResolvedRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    Claims,
    Cookies,
    Database,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Claims => "claims",
            TierKind::Cookies => "cookies",
            TierKind::Database => "database",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the session a lookup runs for is still the live one.
pub type CurrencyCheck<'a> = &'a (dyn Fn() -> bool + Sync);

#[derive(Clone, Copy)]
pub struct RoleRequest<'a> {
    pub user_id: &'a str,
    /// Overrides the database tier's attempt count.
    pub attempts: Option<u32>,
    is_current: Option<CurrencyCheck<'a>>,
}

impl<'a> RoleRequest<'a> {
    pub fn new(user_id: &'a str) -> Self {
        Self {
            user_id,
            attempts: None,
            is_current: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Tie the request to a session. Once `is_current` turns false, retries
    /// stop and nothing found is cached.
    pub fn while_current(mut self, is_current: CurrencyCheck<'a>) -> Self {
        self.is_current = Some(is_current);
        self
    }

    pub fn is_current(&self) -> bool {
        self.is_current.map_or(true, |check| check())
    }
}

impl fmt::Debug for RoleRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleRequest")
            .field("user_id", &self.user_id)
            .field("attempts", &self.attempts)
            .field("guarded", &self.is_current.is_some())
            .finish()
    }
}

#[async_trait]
pub trait RoleTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn try_get(&self, request: &RoleRequest<'_>) -> Option<ResolvedRole>;

    /// Store a value resolved by a later tier.
    async fn set(&self, _user_id: &str, _resolved: &ResolvedRole) {}

    async fn invalidate(&self) {}
}

/// Organization/role pairs embedded in the session.
pub struct ClaimsTier {
    provider: Arc<dyn AuthProvider>,
    cookies: AuthCookies,
    decoder: ClaimsDecoder,
}

impl ClaimsTier {
    pub fn new(provider: Arc<dyn AuthProvider>, cookies: AuthCookies, decoder: ClaimsDecoder) -> Self {
        Self {
            provider,
            cookies,
            decoder,
        }
    }

    async fn claims_for(&self, user_id: &str) -> Vec<OrgRoleClaim> {
        let session = match self.provider.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read session for claims");
                return Vec::new();
            }
        };

        if session.user.id != user_id {
            debug!(
                user_id,
                session_user = %session.user.id,
                "Session belongs to another user, skipping claims"
            );
            return Vec::new();
        }

        if !session.user.app_metadata.org_memberships.is_empty() {
            return session.user.app_metadata.org_memberships;
        }

        match self.decoder.decode(&session.access_token) {
            Ok(claims) if claims.sub == user_id => claims.app_metadata.org_memberships,
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!(error = %e, "Access token claims unreadable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl RoleTier for ClaimsTier {
    fn kind(&self) -> TierKind {
        TierKind::Claims
    }

    async fn try_get(&self, request: &RoleRequest<'_>) -> Option<ResolvedRole> {
        let memberships = self.claims_for(request.user_id).await;
        // A hint left behind by another user says nothing about this one.
        let cached = self.cookies.read();
        let hint = match cached.user_id.as_deref() {
            Some(owner) if owner != request.user_id => None,
            _ => cached.org_id,
        };

        let claim = hint
            .as_deref()
            .and_then(|org| memberships.iter().find(|m| m.org_id == org))
            .or_else(|| memberships.first())?;

        debug!(user_id = request.user_id, org_id = %claim.org_id, role = %claim.role, "Role found in claims");
        Some(ResolvedRole::new(claim.role.clone(), MembershipStatus::Activo))
    }
}

/// `user_id`/`user_rol`/`user_estado` cookies.
pub struct CookieTier {
    cookies: AuthCookies,
}

impl CookieTier {
    pub fn new(cookies: AuthCookies) -> Self {
        Self { cookies }
    }
}

#[async_trait]
impl RoleTier for CookieTier {
    fn kind(&self) -> TierKind {
        TierKind::Cookies
    }

    async fn try_get(&self, request: &RoleRequest<'_>) -> Option<ResolvedRole> {
        let cached = self.cookies.read();

        if let Some(resolved) = cached.role_for(request.user_id) {
            debug!(user_id = request.user_id, role = %resolved.role, "Role found in cookies");
            return Some(resolved);
        }

        if cached.has_identity() {
            info!(
                user_id = request.user_id,
                cached_user = cached.user_id.as_deref().unwrap_or("<none>"),
                "Discarding stale or partial identity cookies"
            );
            self.cookies.clear();
        }

        None
    }

    async fn set(&self, user_id: &str, resolved: &ResolvedRole) {
        self.cookies.write_role(user_id, resolved);
    }

    async fn invalidate(&self) {
        self.cookies.clear();
    }
}

/// Active row in the membership table, retried under `policy`.
pub struct DatabaseTier {
    store: Arc<dyn MembershipStore>,
    provider: Arc<dyn AuthProvider>,
    cookies: AuthCookies,
    policy: RetryPolicy,
}

impl DatabaseTier {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        provider: Arc<dyn AuthProvider>,
        cookies: AuthCookies,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            provider,
            cookies,
            policy,
        }
    }

    async fn lookup(
        &self,
        user_id: &str,
        org_hint: Option<&str>,
    ) -> Result<Option<ResolvedRole>, BackendError> {
        // A session that ended mid-retry will not come back.
        self.provider
            .get_session()
            .await?
            .ok_or(BackendError::NoSession)?;

        let rows = self.store.active_memberships(user_id, org_hint).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| ResolvedRole::new(row.role, row.status)))
    }
}

#[async_trait]
impl RoleTier for DatabaseTier {
    fn kind(&self) -> TierKind {
        TierKind::Database
    }

    async fn try_get(&self, request: &RoleRequest<'_>) -> Option<ResolvedRole> {
        let policy = match request.attempts {
            Some(attempts) => self.policy.clone().with_max_attempts(attempts),
            None => self.policy.clone(),
        };
        let user_id = request.user_id;
        let org_hint = self.cookies.org_hint();
        let org_hint = org_hint.as_deref();

        let result = with_retry(&policy, "role_lookup", move |_| async move {
            if !request.is_current() {
                return Err(BackendError::NoSession);
            }
            self.lookup(user_id, org_hint).await
        })
        .await;

        match result {
            Ok(Some(resolved)) => {
                debug!(user_id, role = %resolved.role, "Role found in database");
                Some(resolved)
            }
            Ok(None) => {
                debug!(user_id, org_id = org_hint.unwrap_or("<any>"), "No active membership");
                None
            }
            Err(e) => {
                warn!(user_id, error = %e, "Role lookup gave up");
                None
            }
        }
    }
}
