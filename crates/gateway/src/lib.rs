//! HTTP API gateway for parley.
//!
//! Exposes the orchestration facade over REST: a health check plus the v1
//! API for running operations, managing conversations, and reading usage.
//! Identity comes from the `X-User-Id` header set by whatever authenticates
//! requests in front of this service.
//!
//! Built on Axum.

pub mod api_v1;
pub mod error;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Method, header};
use axum::{Router, extract::State, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use parley_config::AppConfig;
use parley_orchestrator::Orchestrator;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - Request body size limit (`gateway.max_body_bytes`)
/// - CORS allowing the methods and headers the API uses
/// - HTTP trace logging
pub fn build_router(state: SharedState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(api_v1::USER_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the provider, store, and search backends once and shares them
/// through a single facade.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = parley_providers::build_from_config(&config);
    let search = parley_providers::build_search_from_config(&config);
    let store = parley_store::open_from_config(&config).await?;
    info!(
        provider = provider.name(),
        store = store.name(),
        web_search = search.web.name(),
        video_search = search.video.name(),
        "Collaborators ready"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config, provider, store, search));
    let state = Arc::new(GatewayState::new(orchestrator));
    let app = build_router(state, config.gateway.max_body_bytes);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Health ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub store: String,
    pub operations: usize,
    pub uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        provider: state.orchestrator.provider().name().to_string(),
        store: state.orchestrator.store().name().to_string(),
        operations: state.orchestrator.operations().len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use parley_providers::{NoopSearchProvider, ScriptedProvider, SearchProviders};
    use parley_store::InMemoryStore;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let config = AppConfig::default();
        let search = SearchProviders {
            web: Arc::new(NoopSearchProvider),
            video: Arc::new(NoopSearchProvider),
        };
        let orchestrator = Orchestrator::from_config(
            &config,
            Arc::new(ScriptedProvider::echo()),
            Arc::new(InMemoryStore::new()),
            search,
        );
        Arc::new(GatewayState::new(Arc::new(orchestrator)))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(), 1024 * 1024);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.provider, "echo");
        assert_eq!(health.store, "in_memory");
        assert_eq!(health.operations, 6);
    }

    #[tokio::test]
    async fn health_needs_no_identity_but_v1_does() {
        let app = build_router(test_state(), 1024 * 1024);
        let req = Request::builder().uri("/v1/usage").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn echo_round_trip_through_full_router() {
        let app = build_router(test_state(), 1024 * 1024);
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat")
            .header("content-type", "application/json")
            .header(api_v1::USER_HEADER, "alice")
            .body(Body::from(r#"{"message":"ping"}"#))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["content"], "ping");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = build_router(test_state(), 64);
        let big = format!(r#"{{"message":"{}"}}"#, "x".repeat(1024));
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat")
            .header("content-type", "application/json")
            .header(api_v1::USER_HEADER, "alice")
            .body(Body::from(big))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
