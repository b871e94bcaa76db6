use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::SignedCookieJar;
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;

use crate::models::{AccessFlags, AuthSession, AuthUser, Member, Organization, OrganizationMembership};
use crate::services::{AuthCookies, JarCookieStore, OrganizationResolver, RoleResolver};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: AuthUser,
    pub member: Member,
    pub membership: Option<OrganizationMembership>,
    pub organization: Option<Organization>,
    pub flags: AccessFlags,
}

/// Resolve role and organization for the bearer's session.
///
/// Signed identity cookies sent with the request are honored and rewritten
/// in the response. `flags` follow the same role as `member`.
pub async fn get_session(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<(SignedCookieJar, Json<SessionResponse>), AppError> {
    let TypedHeader(Authorization(bearer)) = bearer
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing bearer token")))?;
    let token = bearer.token();

    let user = state.decoder.decode(token)?.into_user();
    let backend = state
        .backend
        .clone()
        .scoped(AuthSession::new(token, user.clone()));

    let store = Arc::new(JarCookieStore::new(jar, state.config.cookies.secure));
    let cookies = AuthCookies::new(store.clone(), state.config.cookies.max_age());
    let resolution = &state.config.resolution;

    let roles = RoleResolver::standard(
        backend.provider.clone(),
        backend.store.clone(),
        cookies.clone(),
        state.decoder.clone(),
        resolution.role_retry_policy(),
    );
    let organizations =
        OrganizationResolver::new(backend.store, cookies, resolution.query_timeout());

    // Role first: a stale identity cookie is cleared before the org hint is read.
    let access = roles.resolve(&user.id).await;
    let context = organizations.resolve(&user.id).await;

    tracing::info!(
        user_id = %user.id,
        role = ?access.as_ref().map(|a| a.role.as_str()),
        org_id = ?context.membership.as_ref().map(|m| m.organization_id.as_str()),
        "Session resolved"
    );

    let member = Member::new(&user, access);
    let response = SessionResponse {
        flags: AccessFlags::for_role(member.role()),
        member,
        membership: context.membership,
        organization: context.organization,
        user,
    };

    Ok((store.jar(), Json(response)))
}

/// Drop the identity cookies.
pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    let store = Arc::new(JarCookieStore::new(jar, state.config.cookies.secure));
    AuthCookies::new(store.clone(), state.config.cookies.max_age()).clear();
    (store.jar(), StatusCode::NO_CONTENT)
}
