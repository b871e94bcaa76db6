use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use thiserror::Error;

use crate::models::{AppMetadata, AuthUser};

/// Claims carried by the provider's access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

impl AccessTokenClaims {
    pub fn into_user(self) -> AuthUser {
        AuthUser {
            id: self.sub,
            email: self.email,
            app_metadata: self.app_metadata,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

impl From<ClaimsError> for AppError {
    fn from(err: ClaimsError) -> Self {
        AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
    }
}

/// Reads access token claims. Tokens are verified with HS256 when a secret
/// is configured and only base64-decoded otherwise.
#[derive(Clone, Default)]
pub struct ClaimsDecoder {
    secret: Option<Secret<String>>,
}

impl ClaimsDecoder {
    pub fn new(secret: Option<Secret<String>>) -> Self {
        Self { secret }
    }

    pub fn unverified() -> Self {
        Self { secret: None }
    }

    pub fn verifies(&self) -> bool {
        self.secret.is_some()
    }

    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, ClaimsError> {
        match &self.secret {
            Some(secret) => {
                let mut validation = Validation::new(Algorithm::HS256);
                // The provider stamps `aud = authenticated`; audience is not ours to check.
                validation.validate_aud = false;
                let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
                Ok(decode::<AccessTokenClaims>(token, &key, &validation)?.claims)
            }
            None => decode_unverified(token),
        }
    }
}

fn decode_unverified(token: &str) -> Result<AccessTokenClaims, ClaimsError> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        return Err(ClaimsError::Malformed("expected three segments".to_string()));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| ClaimsError::Malformed(format!("payload is not base64: {}", e)))?;

    let claims: AccessTokenClaims = serde_json::from_slice(&payload)
        .map_err(|e| ClaimsError::Malformed(format!("payload is not valid claims: {}", e)))?;

    if claims.exp < Utc::now().timestamp() {
        return Err(ClaimsError::Expired);
    }

    Ok(claims)
}
