//! REST client for the hosted backend: GoTrue-style auth endpoints under
//! `/auth/v1` and PostgREST tables under `/rest/v1`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::backend::{AuthProvider, BackendFactory, MembershipStore, ScopedBackend, AUTH_EVENT_CAPACITY};
use super::error::BackendError;
use crate::config::BackendConfig;
use crate::models::{
    AuthEvent, AuthEventKind, AuthSession, AuthUser, CommitteeMembership, Organization,
    OrganizationMembership,
};

const MEMBERSHIP_TABLE: &str = "organizacion_usuarios";
const ORGANIZATION_TABLE: &str = "organizaciones";
const COMMITTEE_TABLE: &str = "comite_usuarios";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

pub struct SupabaseBackend {
    client: Client,
    base_url: String,
    anon_key: Secret<String>,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self::with_client(
            client,
            config.url.trim_end_matches('/').to_string(),
            config.anon_key.clone(),
            None,
        ))
    }

    fn with_client(
        client: Client,
        base_url: String,
        anon_key: Secret<String>,
        session: Option<AuthSession>,
    ) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            client,
            base_url,
            anon_key,
            session: RwLock::new(session),
            events,
        }
    }

    /// A backend acting on behalf of `session`, sharing this one's connection pool.
    pub fn for_session(&self, session: AuthSession) -> Self {
        Self::with_client(
            self.client.clone(),
            self.base_url.clone(),
            self.anon_key.clone(),
            Some(session),
        )
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<AuthSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn emit(&self, kind: AuthEventKind, session: Option<AuthSession>) {
        // Nobody listening is fine.
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    /// Access token when signed in, the anon key otherwise.
    fn bearer(&self) -> String {
        self.session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.expose_secret().clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<AuthSession, BackendError> {
        let response = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", self.anon_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
        ) && grant_type == "password"
        {
            return Err(BackendError::InvalidCredentials);
        }

        let token: TokenResponse = decode(check(response).await?).await?;
        Ok(token.into_session())
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, BackendError> {
        debug!(table, "Querying table");
        let response = self
            .client
            .get(self.url(&format!("/rest/v1/{}", table)))
            .query(query)
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(self.bearer())
            .send()
            .await?;

        decode(check(response).await?).await
    }
}

async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl AuthProvider for SupabaseBackend {
    async fn get_session(&self) -> Result<Option<AuthSession>, BackendError> {
        Ok(self.session())
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError> {
        let Some(session) = self.session() else {
            return Ok(None);
        };

        let response = self
            .client
            .get(self.url("/auth/v1/user"))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            info!("Session rejected by provider");
            return Ok(None);
        }

        let user: AuthUser = decode(check(response).await?).await?;
        Ok(Some(user))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;

        info!(user_id = %session.user.id, "Signed in");
        self.store_session(Some(session.clone()));
        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<AuthSession, BackendError> {
        let refresh_token = self
            .session()
            .and_then(|s| s.refresh_token)
            .ok_or(BackendError::NoSession)?;

        let session = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        self.store_session(Some(session.clone()));
        self.emit(AuthEventKind::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.session() else {
            return Ok(());
        };

        let result = self
            .client
            .post(self.url("/auth/v1/logout"))
            .header("apikey", self.anon_key.expose_secret())
            .bearer_auth(&session.access_token)
            .send()
            .await;

        // The local session ends whatever the provider says.
        self.store_session(None);
        self.emit(AuthEventKind::SignedOut, None);

        match result {
            Ok(response) => check(response).await.map(|_| ()),
            Err(e) => {
                warn!(error = %e, "Logout request failed");
                Err(e.into())
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl MembershipStore for SupabaseBackend {
    async fn active_memberships(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> Result<Vec<OrganizationMembership>, BackendError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("usuario_id", eq(user_id)),
            ("estado", eq("activo")),
        ];
        if let Some(org) = organization_id {
            query.push(("organizacion_id", eq(org)));
        }

        self.select(MEMBERSHIP_TABLE, &query).await
    }

    async fn organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, BackendError> {
        let rows: Vec<Organization> = self
            .select(
                ORGANIZATION_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("id", eq(organization_id)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn committee_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CommitteeMembership>, BackendError> {
        self.select(
            COMMITTEE_TABLE,
            &[
                ("select", "*,comites(nombre)".to_string()),
                ("usuario_id", eq(user_id)),
                ("estado", eq("activo")),
            ],
        )
        .await
    }
}

impl BackendFactory for SupabaseBackend {
    fn scoped(self: Arc<Self>, session: AuthSession) -> ScopedBackend {
        let scoped = Arc::new(self.for_session(session));
        ScopedBackend {
            provider: scoped.clone(),
            store: scoped,
        }
    }
}
