//! Health checks for the dungeon finder service
//!
//! Readiness and liveness probes look at the running flag, the engine lock
//! and the broker connection through a [`ServiceProbe`].

use crate::amqp::connection::AmqpConnection;
use crate::lfg::QueueSizes;
use crate::service::app::SharedEngine;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// How long a health check waits for the engine before calling it busy
const ENGINE_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Handles on the parts of the service that health checks inspect
#[derive(Clone)]
pub struct ServiceProbe {
    pub service_name: String,
    pub engine: SharedEngine,
    pub amqp_connection: Option<Arc<AmqpConnection>>,
    pub is_running: Arc<RwLock<bool>>,
    pub started_at: Instant,
}

impl ServiceProbe {
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Queue sizes, or `None` when the engine stayed busy
    pub async fn queue_sizes(&self) -> Option<QueueSizes> {
        tokio::time::timeout(ENGINE_LOCK_TIMEOUT, self.engine.lock())
            .await
            .ok()
            .map(|engine| engine.queue_sizes())
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub queued_entries: usize,
    pub queued_players: usize,
    pub role_checks: usize,
    pub proposals: usize,
    pub vote_kicks: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        for check in [
            Self::check_service_running(probe).await,
            Self::check_engine(probe).await,
            Self::check_amqp_health(probe),
        ] {
            match check.status {
                HealthStatus::Unhealthy => overall_status = HealthStatus::Unhealthy,
                HealthStatus::Degraded if overall_status == HealthStatus::Healthy => {
                    overall_status = HealthStatus::Degraded
                }
                _ => {}
            }
            checks.push(check);
        }

        let stats = Self::gather_service_stats(probe).await;

        Ok(HealthCheck {
            status: overall_status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let engine = Self::check_engine(probe).await.status;
        let amqp = Self::check_amqp_health(probe).status;
        Ok(match (engine, amqp) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        })
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The engine is healthy when its lock can be taken in time
    async fn check_engine(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match probe.queue_sizes().await {
            Some(_) => (HealthStatus::Healthy, None),
            None => (
                HealthStatus::Degraded,
                Some(format!(
                    "Engine busy for more than {}ms",
                    ENGINE_LOCK_TIMEOUT.as_millis()
                )),
            ),
        };

        ComponentCheck {
            name: "lfg_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &probe.amqp_connection {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without a broker".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(probe: &ServiceProbe) -> ServiceStats {
        let uptime_seconds = probe.started_at.elapsed().as_secs();
        match probe.queue_sizes().await {
            Some(sizes) => ServiceStats {
                queued_entries: sizes.entries,
                queued_players: sizes.players,
                role_checks: sizes.role_checks,
                proposals: sizes.proposals,
                vote_kicks: sizes.boots,
                uptime_seconds,
            },
            None => {
                debug!("Engine busy, reporting empty stats");
                ServiceStats {
                    uptime_seconds,
                    ..Default::default()
                }
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LfgConfig;
    use crate::dungeon::DungeonCatalog;
    use crate::lfg::LfgManager;
    use crate::utils::SystemClock;
    use crate::world::InMemoryWorld;
    use tokio::sync::Mutex;

    fn create_test_probe(running: bool) -> ServiceProbe {
        let manager = LfgManager::new(
            LfgConfig::default(),
            Arc::new(DungeonCatalog::new(vec![])),
            InMemoryWorld::new(),
            Arc::new(SystemClock),
        );
        ServiceProbe {
            service_name: "dungeon-finder".to_string(),
            engine: Arc::new(Mutex::new(manager)),
            amqp_connection: None,
            is_running: Arc::new(RwLock::new(running)),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_liveness_follows_running_flag() {
        assert_eq!(
            HealthCheck::liveness_check(&create_test_probe(true))
                .await
                .unwrap(),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthCheck::liveness_check(&create_test_probe(false))
                .await
                .unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_without_broker_is_degraded() {
        let probe = create_test_probe(true);
        assert_eq!(
            HealthCheck::readiness_check(&probe).await.unwrap(),
            HealthStatus::Degraded
        );

        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.queued_entries, 0);
        assert!(health.to_json().unwrap().contains("lfg_engine"));
    }

    #[tokio::test]
    async fn test_busy_engine_is_degraded() {
        let probe = create_test_probe(true);
        let _guard = probe.engine.lock().await;
        let check = HealthCheck::check_engine(&probe).await;
        assert_eq!(check.status, HealthStatus::Degraded);
    }
}
