//! Health check endpoints and Prometheus metrics server
//!
//! This module provides HTTP endpoints for health checks and Prometheus metrics
//! for the dungeon finder service using Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthStatus, ServiceProbe};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "dungeon-finder";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub probe: Option<ServiceProbe>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                probe: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service handles that health checks inspect
    pub fn with_probe(mut self, probe: ServiceProbe) -> Self {
        self.state.probe = Some(probe);
        self
    }

    /// Start the health server
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }

        info!("Health server stop signal sent");
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

/// Lightweight health check endpoint handler
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let status = match &state.probe {
        Some(probe) => HealthCheck::liveness_check(probe)
            .await
            .unwrap_or(HealthStatus::Unhealthy),
        None => HealthStatus::Unhealthy,
    };
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.probe {
        Some(probe) => match HealthCheck::readiness_check(probe).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
            Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
            Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
            Err(e) => {
                error!("Readiness check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.probe {
        Some(probe) => match HealthCheck::liveness_check(probe).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match render_metrics(&state.metrics_collector) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                "Failed to encode metrics".to_string(),
            )
        }
    }
}

/// Detailed service statistics for humans
async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Stats endpoint requested");

    let Some(probe) = &state.probe else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": { "name": SERVICE_NAME, "status": "error" },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    match HealthCheck::check(probe).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptime_seconds": health.stats.uptime_seconds
                },
                "queue": {
                    "entries": health.stats.queued_entries,
                    "players": health.stats.queued_players,
                    "role_checks": health.stats.role_checks,
                    "proposals": health.stats.proposals,
                    "vote_kicks": health.stats.vote_kicks
                },
                "components": health.checks,
                "timestamp": health.timestamp
            })),
        ),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}

/// Metrics as Prometheus text format
pub fn render_metrics(metrics_collector: &MetricsCollector) -> Result<String> {
    let metric_families = metrics_collector.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics were not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LfgConfig;
    use crate::dungeon::DungeonCatalog;
    use crate::lfg::{LfgManager, LfgOutcome};
    use crate::types::LfgJoinResult;
    use crate::utils::SystemClock;
    use crate::world::InMemoryWorld;
    use axum::{body::Body, http::Request};
    use std::time::Instant;
    use tokio::sync::{Mutex, RwLock};
    use tower::ServiceExt;

    fn create_test_server(with_probe: bool) -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        let server = HealthServer::new(HealthServerConfig::default(), collector);
        if !with_probe {
            return server;
        }
        let manager = LfgManager::new(
            LfgConfig::default(),
            Arc::new(DungeonCatalog::new(vec![])),
            InMemoryWorld::new(),
            Arc::new(SystemClock),
        );
        server.with_probe(ServiceProbe {
            service_name: SERVICE_NAME.to_string(),
            engine: Arc::new(Mutex::new(manager)),
            amqp_connection: None,
            is_running: Arc::new(RwLock::new(true)),
            started_at: Instant::now(),
        })
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_test_server(false).create_router();
        assert_eq!(get_status(app, "/").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = create_test_server(false);
        server
            .state
            .metrics_collector
            .record_outcome(&LfgOutcome::Join(LfgJoinResult::Ok));

        let response = server
            .create_router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let text = render_metrics(&server.state.metrics_collector).unwrap();
        assert!(text.contains("dungeon_finder_joins_total"));
    }

    #[tokio::test]
    async fn test_endpoints_without_probe() {
        let app = create_test_server(false).create_router();
        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(
                get_status(app.clone(), uri).await,
                StatusCode::SERVICE_UNAVAILABLE,
                "{}",
                uri
            );
        }
    }

    #[tokio::test]
    async fn test_endpoints_with_probe() {
        let app = create_test_server(true).create_router();
        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(get_status(app.clone(), uri).await, StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_404_handling() {
        let app = create_test_server(false).create_router();
        assert_eq!(get_status(app, "/nonexistent").await, StatusCode::NOT_FOUND);
    }
}
