pub mod config;
pub mod handlers;
pub mod models;
pub mod services;

use axum::extract::FromRef;
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::Key;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{http_span, request_id_middleware},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::SessionConfig;
use services::{cookies::cookie_key, BackendFactory, ClaimsDecoder, SupabaseBackend};

#[derive(Clone)]
pub struct AppState {
    pub config: SessionConfig,
    pub backend: Arc<dyn BackendFactory>,
    pub decoder: ClaimsDecoder,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: SessionConfig, backend: Arc<dyn BackendFactory>) -> Self {
        let decoder = ClaimsDecoder::new(config.jwt.secret.clone());
        let cookie_key = cookie_key(&config.cookies);
        Self {
            config,
            backend,
            decoder,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/session", get(handlers::session::get_session))
        .route("/session/logout", post(handlers::session::logout))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::extract::Request| http_span(request),
        ))
        .with_state(state)
}

pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: SessionConfig) -> anyhow::Result<Self> {
        let backend = SupabaseBackend::new(&config.backend)?;
        tracing::info!(url = %config.backend.url, "Backend client initialized");

        if config.jwt.secret.is_none() {
            tracing::warn!("JWT_SECRET not set - access tokens are decoded without verification");
        }

        Self::with_backend(config, Arc::new(backend)).await
    }

    /// Build against any backend, e.g. the in-memory one.
    pub async fn with_backend(
        config: SessionConfig,
        backend: Arc<dyn BackendFactory>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.common.bind_address()).await?;
        let router = build_router(AppState::new(config, backend));
        Ok(Self { listener, router })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|addr| addr.port()).unwrap_or(0)
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on {:?}", self.listener.local_addr());
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
