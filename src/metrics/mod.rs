//! Metrics and monitoring for the dungeon finder service
//!
//! Prometheus counters for matchmaking outcomes and queue gauges, served
//! together with health probes over HTTP.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, PerformanceMetrics, QueueMetrics, ServiceMetrics,
};
pub use health::{render_metrics, HealthServer, HealthServerConfig};

use std::sync::Arc;

/// Unified metrics service that combines all monitoring capabilities
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve health endpoints until stopped
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }
}
