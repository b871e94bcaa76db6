use serde::{Deserialize, Serialize};

use super::role::Role;

/// Organization/role pair embedded in the session's app metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRoleClaim {
    pub org_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default)]
    pub org_memberships: Vec<OrgRoleClaim>,
}

/// The authenticated identity as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_string),
            app_metadata: AppMetadata::default(),
        }
    }

    pub fn with_org_memberships(mut self, memberships: Vec<OrgRoleClaim>) -> Self {
        self.app_metadata.org_memberships = memberships;
        self
    }
}

/// A live session owned by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn new(access_token: impl Into<String>, user: AuthUser) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::InitialSession => "INITIAL_SESSION",
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEventKind::UserUpdated => "USER_UPDATED",
        }
    }
}

/// Session change notification emitted by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<AuthSession>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<AuthSession>) -> Self {
        Self { kind, session }
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|s| &s.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_provider_user_payload() {
        let user: AuthUser = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "email": "ana@iglesia.org",
            "app_metadata": {
                "provider": "email",
                "org_memberships": [{"org_id": "org-1", "role": "admin"}]
            }
        }))
        .unwrap();

        assert_eq!(user.app_metadata.org_memberships.len(), 1);
        assert_eq!(user.app_metadata.org_memberships[0].role, Role::Admin);
    }

    #[test]
    fn missing_app_metadata_defaults_to_empty() {
        let user: AuthUser = serde_json::from_value(serde_json::json!({"id": "u2"})).unwrap();
        assert!(user.app_metadata.org_memberships.is_empty());
        assert!(user.email.is_none());
    }
}
