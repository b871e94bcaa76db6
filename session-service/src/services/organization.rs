use serde::Serialize;
use service_core::utils::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth_session::AuthState;
use super::backend::MembershipStore;
use super::cookies::AuthCookies;
use crate::models::{AuthUser, OrganizationContext};

/// Picks the tenant the user is acting in.
///
/// The `org_id` cookie narrows the membership query when present; otherwise
/// the first active membership wins. A failed organization fetch still
/// returns the membership.
pub struct OrganizationResolver {
    store: Arc<dyn MembershipStore>,
    cookies: AuthCookies,
    timeout: Duration,
}

impl OrganizationResolver {
    pub fn new(store: Arc<dyn MembershipStore>, cookies: AuthCookies, timeout: Duration) -> Self {
        Self {
            store,
            cookies,
            timeout,
        }
    }

    pub async fn resolve(&self, user_id: &str) -> OrganizationContext {
        let hint = self.cookies.org_hint();

        let memberships = match with_timeout(
            self.timeout,
            self.store.active_memberships(user_id, hint.as_deref()),
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id, error = %e, "Membership query failed");
                return OrganizationContext::empty();
            }
        };

        let Some(membership) = memberships.into_iter().find(|m| m.is_active()) else {
            debug!(user_id, org_id = hint.as_deref().unwrap_or("<any>"), "No active membership");
            return OrganizationContext::empty();
        };

        let organization = match with_timeout(
            self.timeout,
            self.store.organization(&membership.organization_id),
        )
        .await
        {
            Ok(Some(organization)) => Some(organization),
            Ok(None) => {
                warn!(org_id = %membership.organization_id, "Organization record missing");
                None
            }
            Err(e) => {
                warn!(
                    org_id = %membership.organization_id,
                    error = %e,
                    "Organization fetch failed, exposing membership only"
                );
                None
            }
        };

        OrganizationContext {
            membership: Some(membership),
            organization,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationState {
    pub user_id: Option<String>,
    pub context: OrganizationContext,
    pub loading: bool,
}

/// Keeps an [`OrganizationState`] in step with the signed-in user.
pub struct OrganizationWatcher {
    state: watch::Receiver<OrganizationState>,
    task: JoinHandle<()>,
}

impl OrganizationWatcher {
    pub fn spawn(resolver: Arc<OrganizationResolver>, mut auth: watch::Receiver<AuthState>) -> Self {
        let (tx, rx) = watch::channel(OrganizationState::default());

        let task = tokio::spawn(async move {
            let mut followed: Option<Option<AuthUser>> = None;

            loop {
                let user = auth.borrow_and_update().user.clone();

                if followed.as_ref() != Some(&user) {
                    followed = Some(user.clone());

                    match user {
                        None => {
                            tx.send_replace(OrganizationState::default());
                        }
                        Some(user) => {
                            tx.send_modify(|s| {
                                if s.user_id.as_deref() != Some(user.id.as_str()) {
                                    s.context = OrganizationContext::empty();
                                }
                                s.user_id = Some(user.id.clone());
                                s.loading = true;
                            });

                            let context = resolver.resolve(&user.id).await;

                            let still_current =
                                auth.borrow().user.as_ref().map(|u| &u.id) == Some(&user.id);
                            if still_current {
                                info!(
                                    user_id = %user.id,
                                    org_id = ?context.membership.as_ref().map(|m| &m.organization_id),
                                    "Organization resolved"
                                );
                                tx.send_modify(|s| {
                                    s.context = context;
                                    s.loading = false;
                                });
                            }
                        }
                    }
                }

                if auth.changed().await.is_err() {
                    break;
                }
            }
        });

        Self { state: rx, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrganizationState> {
        self.state.clone()
    }

    pub fn current(&self) -> OrganizationState {
        self.state.borrow().clone()
    }
}

impl Drop for OrganizationWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
