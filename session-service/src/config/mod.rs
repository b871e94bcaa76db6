use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::utils::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub backend: BackendConfig,
    pub jwt: JwtConfig,
    pub cookies: CookieConfig,
    pub resolution: ResolutionConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hosted backend (auth + REST).
    pub url: String,
    pub anon_key: Secret<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify access tokens. Unverified decoding when absent.
    pub secret: Option<Secret<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub max_age_days: i64,
    pub secure: bool,
    /// Signing secret for the identity cookies, at least
    /// [`MIN_COOKIE_SECRET_LEN`] bytes.
    pub secret: Option<Secret<String>>,
}

pub const MIN_COOKIE_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    pub query_timeout_secs: u64,
    pub role_query_attempts: u32,
    pub role_backoff_ms: u64,
    pub safety_timeout_secs: u64,
    pub recheck_delay_ms: u64,
    pub recheck_attempts: u32,
    /// Re-run a load that arrived while another was in flight.
    pub coalesce_loads: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 10,
            role_query_attempts: 3,
            role_backoff_ms: 800,
            safety_timeout_secs: 12,
            recheck_delay_ms: 1000,
            recheck_attempts: 2,
            coalesce_loads: false,
        }
    }
}

impl ResolutionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Policy for the database tier: linear backoff, each attempt raced
    /// against the query timeout.
    pub fn role_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.role_query_attempts,
            Duration::from_millis(self.role_backoff_ms),
        )
        .with_attempt_timeout(self.query_timeout())
    }
}

impl CookieConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_age_days)
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let defaults = ResolutionConfig::default();

        let config = SessionConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("session-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            backend: BackendConfig {
                url: get_env("BACKEND_URL", Some("http://localhost:54321"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                anon_key: Secret::new(get_env("BACKEND_ANON_KEY", Some("anon-dev-key"), is_prod)?),
                request_timeout_secs: parse_env("BACKEND_REQUEST_TIMEOUT_SECS", 15)?,
            },
            jwt: JwtConfig {
                secret: match env::var("JWT_SECRET") {
                    Ok(s) if !s.is_empty() => Some(Secret::new(s)),
                    _ if is_prod => {
                        return Err(AppError::ConfigError(anyhow::anyhow!(
                            "JWT_SECRET is required in production but not set"
                        )));
                    }
                    _ => None,
                },
            },
            cookies: CookieConfig {
                max_age_days: parse_env("COOKIE_MAX_AGE_DAYS", 7)?,
                secure: parse_env("SECURE_COOKIES", is_prod)?,
                secret: match env::var("COOKIE_SECRET") {
                    Ok(s) if s.len() >= MIN_COOKIE_SECRET_LEN => Some(Secret::new(s)),
                    Ok(s) if !s.is_empty() => {
                        return Err(AppError::ConfigError(anyhow::anyhow!(
                            "COOKIE_SECRET must be at least {} bytes",
                            MIN_COOKIE_SECRET_LEN
                        )));
                    }
                    _ if is_prod => {
                        return Err(AppError::ConfigError(anyhow::anyhow!(
                            "COOKIE_SECRET is required in production but not set"
                        )));
                    }
                    _ => None,
                },
            },
            resolution: ResolutionConfig {
                query_timeout_secs: parse_env("QUERY_TIMEOUT_SECS", defaults.query_timeout_secs)?,
                role_query_attempts: parse_env(
                    "ROLE_QUERY_ATTEMPTS",
                    defaults.role_query_attempts,
                )?,
                role_backoff_ms: parse_env("ROLE_BACKOFF_MS", defaults.role_backoff_ms)?,
                safety_timeout_secs: parse_env(
                    "SAFETY_TIMEOUT_SECS",
                    defaults.safety_timeout_secs,
                )?,
                recheck_delay_ms: parse_env("ROLE_RECHECK_DELAY_MS", defaults.recheck_delay_ms)?,
                recheck_attempts: parse_env("ROLE_RECHECK_ATTEMPTS", defaults.recheck_attempts)?,
                coalesce_loads: parse_env("SESSION_LOAD_COALESCE", defaults.coalesce_loads)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.cookies.max_age_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "COOKIE_MAX_AGE_DAYS must be positive"
            )));
        }

        if self.resolution.role_query_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ROLE_QUERY_ATTEMPTS must be at least 1"
            )));
        }

        if self.environment == Environment::Prod {
            if !self.cookies.secure {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SECURE_COOKIES cannot be disabled in production"
                )));
            }

            if self.backend.anon_key.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "BACKEND_ANON_KEY must not be empty in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, required: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if required {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
