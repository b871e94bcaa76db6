use std::sync::Arc;
use tracing::debug;

use super::backend::{AuthProvider, MembershipStore};
use super::claims::ClaimsDecoder;
use super::cookies::AuthCookies;
use super::metrics;
use super::tiers::{ClaimsTier, CookieTier, CurrencyCheck, DatabaseTier, RoleRequest, RoleTier};
use crate::models::ResolvedRole;
use service_core::utils::RetryPolicy;

/// Read-through chain over role tiers. The first tier with an answer wins,
/// and every tier before it is handed that answer to store.
pub struct RoleResolver {
    tiers: Vec<Box<dyn RoleTier>>,
}

impl RoleResolver {
    pub fn new(tiers: Vec<Box<dyn RoleTier>>) -> Self {
        Self { tiers }
    }

    /// Claims, then cookies, then the membership table.
    pub fn standard(
        provider: Arc<dyn AuthProvider>,
        store: Arc<dyn MembershipStore>,
        cookies: AuthCookies,
        decoder: ClaimsDecoder,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(vec![
            Box::new(ClaimsTier::new(provider.clone(), cookies.clone(), decoder)),
            Box::new(CookieTier::new(cookies.clone())),
            Box::new(DatabaseTier::new(store, provider, cookies, policy)),
        ])
    }

    /// Never fails: every tier is tried before giving up with `None`.
    pub async fn resolve(&self, user_id: &str) -> Option<ResolvedRole> {
        self.resolve_request(RoleRequest::new(user_id)).await
    }

    /// Same as [`resolve`](Self::resolve) with a different database attempt count.
    pub async fn resolve_with_attempts(&self, user_id: &str, attempts: u32) -> Option<ResolvedRole> {
        self.resolve_request(RoleRequest::new(user_id).with_attempts(attempts))
            .await
    }

    /// Resolution on behalf of one session. When `is_current` turns false the
    /// database tier stops retrying and the answer is not written back.
    pub async fn resolve_while(
        &self,
        user_id: &str,
        attempts: Option<u32>,
        is_current: CurrencyCheck<'_>,
    ) -> Option<ResolvedRole> {
        let mut request = RoleRequest::new(user_id).while_current(is_current);
        if let Some(attempts) = attempts {
            request = request.with_attempts(attempts);
        }
        self.resolve_request(request).await
    }

    pub async fn invalidate_all(&self) {
        for tier in &self.tiers {
            tier.invalidate().await;
        }
    }

    async fn resolve_request(&self, request: RoleRequest<'_>) -> Option<ResolvedRole> {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(resolved) = tier.try_get(&request).await else {
                continue;
            };

            if request.is_current() {
                for earlier in &self.tiers[..index] {
                    earlier.set(request.user_id, &resolved).await;
                }
            } else {
                debug!(user_id = request.user_id, "Session ended during lookup, not caching");
            }

            metrics::record_role_resolution(Some(tier.kind()));
            return Some(resolved);
        }

        debug!(user_id = request.user_id, "No tier could resolve a role");
        metrics::record_role_resolution(None);
        None
    }
}
