#![allow(dead_code)]

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::Secret;
use service_core::utils::RetryPolicy;
use session_service::config::{
    BackendConfig, CookieConfig, Environment, JwtConfig, ResolutionConfig, SessionConfig,
};
use session_service::models::{
    AppMetadata, AuthSession, AuthUser, CommitteeMembership, CommitteeSummary, MembershipStatus,
    OrgRoleClaim, Organization, OrganizationMembership, Role,
};
use session_service::services::{
    AccessTokenClaims, AuthCookies, ClaimsDecoder, MemoryCookieStore, MockBackend, RoleResolver,
};
use std::sync::Arc;

pub const COOKIE_MAX_AGE_DAYS: i64 = 7;
pub const TEST_COOKIE_SECRET: &str = "test-cookie-signing-secret-0123456789abcdef";

pub fn memory_cookies() -> (Arc<MemoryCookieStore>, AuthCookies) {
    let store = Arc::new(MemoryCookieStore::new());
    let cookies = AuthCookies::new(store.clone(), chrono::Duration::days(COOKIE_MAX_AGE_DAYS));
    (store, cookies)
}

pub fn user(id: &str) -> AuthUser {
    AuthUser::new(id, Some(&format!("{}@iglesia.org", id)))
}

pub fn user_with_claims(id: &str, claims: &[(&str, Role)]) -> AuthUser {
    user(id).with_org_memberships(
        claims
            .iter()
            .map(|(org_id, role)| OrgRoleClaim {
                org_id: org_id.to_string(),
                role: role.clone(),
            })
            .collect(),
    )
}

pub fn session(user: AuthUser) -> AuthSession {
    AuthSession::new(format!("mock-token-{}", user.id), user)
}

pub fn membership(user_id: &str, org_id: &str, role: Role) -> OrganizationMembership {
    OrganizationMembership {
        id: format!("{}-{}", user_id, org_id),
        organization_id: org_id.to_string(),
        user_id: user_id.to_string(),
        role,
        status: MembershipStatus::Activo,
    }
}

pub fn organization(id: &str, name: &str) -> Organization {
    Organization {
        id: id.to_string(),
        name: name.to_string(),
        slug: Some(id.to_string()),
        plan: Some("basico".to_string()),
        limits: None,
        contact: Default::default(),
        branding: Default::default(),
        status: Some("activo".to_string()),
        created_at: None,
    }
}

pub fn committee_seat(user_id: &str, committee: &str) -> CommitteeMembership {
    CommitteeMembership {
        id: format!("{}-{}", user_id, committee),
        committee_id: committee.to_string(),
        user_id: user_id.to_string(),
        role: "miembro".to_string(),
        status: MembershipStatus::Activo,
        committee: Some(CommitteeSummary {
            name: committee.to_string(),
        }),
    }
}

pub fn role_policy() -> RetryPolicy {
    ResolutionConfig::default().role_retry_policy()
}

pub fn resolver(backend: &Arc<MockBackend>, cookies: &AuthCookies) -> RoleResolver {
    RoleResolver::standard(
        backend.clone(),
        backend.clone(),
        cookies.clone(),
        ClaimsDecoder::unverified(),
        role_policy(),
    )
}

/// HS256 access token as the provider would mint it.
pub fn access_token(user_id: &str, secret: &str, claims: &[(&str, Role)]) -> String {
    let claims = AccessTokenClaims {
        sub: user_id.to_string(),
        email: Some(format!("{}@iglesia.org", user_id)),
        exp: Utc::now().timestamp() + 3600,
        app_metadata: AppMetadata {
            org_memberships: claims
                .iter()
                .map(|(org_id, role)| OrgRoleClaim {
                    org_id: org_id.to_string(),
                    role: role.clone(),
                })
                .collect(),
        },
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign test token")
}

pub fn test_config(jwt_secret: Option<&str>) -> SessionConfig {
    SessionConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "session-service-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        backend: BackendConfig {
            url: "http://127.0.0.1:9".to_string(),
            anon_key: Secret::new("anon-test-key".to_string()),
            request_timeout_secs: 5,
        },
        jwt: JwtConfig {
            secret: jwt_secret.map(|s| Secret::new(s.to_string())),
        },
        cookies: CookieConfig {
            max_age_days: COOKIE_MAX_AGE_DAYS,
            secure: false,
            secret: Some(Secret::new(TEST_COOKIE_SECRET.to_string())),
        },
        resolution: ResolutionConfig::default(),
    }
}
