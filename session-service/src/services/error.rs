use service_core::error::AppError;
use service_core::utils::{Retryable, TimeoutError};
use thiserror::Error;

/// Failures talking to the hosted auth provider or the data backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("No active session")]
    NoSession,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TimeoutError> for BackendError {
    fn from(err: TimeoutError) -> Self {
        BackendError::Timeout(err.after.as_millis() as u64)
    }
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Network(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::NoSession
            | BackendError::InvalidCredentials
            | BackendError::Decode(_)
            | BackendError::Internal(_) => false,
        }
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout(ms) => AppError::GatewayTimeout(ms),
            BackendError::Network(e) => AppError::BadGateway(e.to_string()),
            BackendError::Status { status, message } => {
                AppError::BadGateway(format!("{}: {}", status, message))
            }
            BackendError::NoSession => AppError::Unauthorized(anyhow::anyhow!("No active session")),
            BackendError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            BackendError::Decode(e) => AppError::BadGateway(e),
            BackendError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(BackendError::Timeout(10_000).is_retryable());
        assert!(BackendError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
    }

    #[test]
    fn session_loss_is_not_retryable() {
        assert!(!BackendError::NoSession.is_retryable());
        assert!(!BackendError::Status {
            status: 401,
            message: "jwt expired".into()
        }
        .is_retryable());
    }

    #[test]
    fn timeout_error_keeps_deadline() {
        let err = BackendError::from(TimeoutError {
            after: Duration::from_secs(10),
        });
        assert!(matches!(err, BackendError::Timeout(10_000)));
    }
}
