//! Health check endpoints
//!
//! `/health` answers whenever the process is up, `/ready` only once the load
//! state is POSTLOAD with at least one ready shard, `/metrics` renders the
//! Prometheus registry.

use crate::bootstrap::OutwardListener;
use crate::context::GatewayContext;
use crate::error::GatewayError;
use crate::load_state::LoadState;
use crate::metrics::GatewayMetrics;
use crate::nats::MessageBus;
use crate::router::ShardRouter;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub node: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub node: String,
    pub load_state: String,
    pub shards_total: u32,
    pub shards_ready: usize,
    pub nats_connected: bool,
    pub guilds_total: usize,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub node: String,
    pub router: Arc<ShardRouter>,
    pub bus: Arc<dyn MessageBus>,
    pub metrics: Arc<GatewayMetrics>,
}

impl AppState {
    pub fn from_context(ctx: &GatewayContext) -> Self {
        Self {
            node: ctx.node.label(),
            router: Arc::clone(&ctx.router),
            bus: Arc::clone(&ctx.bus),
            metrics: Arc::clone(&ctx.metrics),
        }
    }
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Always 200 while the process is running
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        node: state.node,
    })
}

pub async fn ready_handler(State(state): State<AppState>) -> Response {
    let stats = state.router.stats();
    let load_state = state.router.load_state();
    let nats_connected = state.bus.is_connected();

    let ready = load_state == LoadState::PostLoad && stats.shards_ready > 0 && nats_connected;

    let response = ReadyResponse {
        ready,
        node: state.node,
        load_state: load_state.to_string(),
        shards_total: stats.shards_total,
        shards_ready: stats.shards_ready,
        nats_connected,
        guilds_total: stats.guilds,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.metrics.record_stats(&state.router.stats());
    state.metrics.set_nats_connected(state.bus.is_connected());

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
        .into_response()
}

/// Serves the health router once the process is ready
pub struct HealthListener {
    port: u16,
}

impl HealthListener {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl OutwardListener for HealthListener {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn start(&self, ctx: &GatewayContext) -> Result<JoinHandle<()>, GatewayError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::ListenerFailed {
                listener: "health",
                source: Box::new(e),
            })?;

        info!(port = self.port, "Starting HTTP server");
        let app = router(AppState::from_context(ctx));

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server error");
            }
        }))
    }
}
