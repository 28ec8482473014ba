//! Metrics collection using Prometheus
//!
//! Engine outcomes are drained from the manager after every call and folded
//! into counters here; queue gauges are refreshed once per tick.

use crate::lfg::{LfgOutcome, QueueKey, QueueSizes, TickReport};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the dungeon finder service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    match_metrics: MatchMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue occupancy
#[derive(Clone)]
pub struct QueueMetrics {
    /// Queue entries (solo players and groups) per partition
    pub queue_entries: IntGaugeVec,

    /// Players waiting across all partitions
    pub players_queued: IntGauge,

    pub role_checks_active: IntGauge,
    pub proposals_active: IntGauge,
    pub boots_active: IntGauge,
}

/// Matchmaking outcomes
#[derive(Clone)]
pub struct MatchMetrics {
    /// Join attempts by result code
    pub joins_total: IntCounterVec,

    /// Role checks by final state
    pub role_checks_total: IntCounterVec,

    /// Proposals by outcome (created, succeeded, or the failure reason)
    pub proposals_total: IntCounterVec,

    /// Vote kicks by outcome
    pub boots_total: IntCounterVec,

    /// Random dungeon rewards by first/repeat
    pub rewards_total: IntCounterVec,

    /// Proposals formed per matching pass
    pub proposals_per_tick: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Engine tick duration
    pub tick_duration: Histogram,

    /// Request handling duration by request kind
    pub request_duration: HistogramVec,

    /// Total ticks run
    pub ticks_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Fold one engine outcome into the counters
    pub fn record_outcome(&self, outcome: &LfgOutcome) {
        let metrics = &self.match_metrics;
        match outcome {
            LfgOutcome::Join(result) => metrics
                .joins_total
                .with_label_values(&[&format!("{:?}", result)])
                .inc(),
            LfgOutcome::RoleCheck(state) => metrics
                .role_checks_total
                .with_label_values(&[&format!("{:?}", state)])
                .inc(),
            LfgOutcome::ProposalCreated => {
                metrics.proposals_total.with_label_values(&["created"]).inc()
            }
            LfgOutcome::ProposalSucceeded => metrics
                .proposals_total
                .with_label_values(&["succeeded"])
                .inc(),
            LfgOutcome::ProposalFailed(reason) => metrics
                .proposals_total
                .with_label_values(&[&format!("{:?}", reason)])
                .inc(),
            LfgOutcome::Boot { passed } => metrics
                .boots_total
                .with_label_values(&[if *passed { "passed" } else { "failed" }])
                .inc(),
            LfgOutcome::Reward { repeat } => metrics
                .rewards_total
                .with_label_values(&[if *repeat { "repeat" } else { "first" }])
                .inc(),
        }
    }

    pub fn record_outcomes(&self, outcomes: &[LfgOutcome]) {
        for outcome in outcomes {
            self.record_outcome(outcome);
        }
    }

    /// Refresh queue gauges
    pub fn update_queue_sizes(&self, sizes: &QueueSizes, lengths: &[(QueueKey, usize)]) {
        let metrics = &self.queue_metrics;
        metrics.queue_entries.reset();
        for (key, len) in lengths {
            metrics
                .queue_entries
                .with_label_values(&[&key.to_string()])
                .set(*len as i64);
        }
        metrics.players_queued.set(sizes.players as i64);
        metrics.role_checks_active.set(sizes.role_checks as i64);
        metrics.proposals_active.set(sizes.proposals as i64);
        metrics.boots_active.set(sizes.boots as i64);
    }

    /// Record one engine tick
    pub fn record_tick(&self, report: &TickReport, duration: Duration) {
        self.performance_metrics.ticks_total.inc();
        self.performance_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
        if !report.new_proposals.is_empty() {
            self.match_metrics
                .proposals_per_tick
                .observe(report.new_proposals.len() as f64);
        }
    }

    /// Record a handled AMQP request
    pub fn record_request(&self, kind: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[kind, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[kind])
                .inc();
        }

        self.performance_metrics
            .request_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("dungeon_finder_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "dungeon_finder_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["request", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("dungeon_finder_amqp_errors_total", "Total AMQP errors"),
            &["request"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "dungeon_finder_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("dungeon_finder_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_entries = IntGaugeVec::new(
            Opts::new("dungeon_finder_queue_entries", "Queued players and groups"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_entries.clone()))?;

        let players_queued =
            IntGauge::new("dungeon_finder_players_queued", "Players waiting in queue")?;
        registry.register(Box::new(players_queued.clone()))?;

        let role_checks_active = IntGauge::new(
            "dungeon_finder_role_checks_active",
            "Role checks awaiting answers",
        )?;
        registry.register(Box::new(role_checks_active.clone()))?;

        let proposals_active = IntGauge::new(
            "dungeon_finder_proposals_active",
            "Proposals awaiting answers",
        )?;
        registry.register(Box::new(proposals_active.clone()))?;

        let boots_active =
            IntGauge::new("dungeon_finder_boots_active", "Vote kicks in progress")?;
        registry.register(Box::new(boots_active.clone()))?;

        Ok(Self {
            queue_entries,
            players_queued,
            role_checks_active,
            proposals_active,
            boots_active,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("dungeon_finder_joins_total", "Join attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let role_checks_total = IntCounterVec::new(
            Opts::new("dungeon_finder_role_checks_total", "Role checks by outcome"),
            &["state"],
        )?;
        registry.register(Box::new(role_checks_total.clone()))?;

        let proposals_total = IntCounterVec::new(
            Opts::new("dungeon_finder_proposals_total", "Proposals by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(proposals_total.clone()))?;

        let boots_total = IntCounterVec::new(
            Opts::new("dungeon_finder_boots_total", "Vote kicks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(boots_total.clone()))?;

        let rewards_total = IntCounterVec::new(
            Opts::new("dungeon_finder_rewards_total", "Random dungeon rewards granted"),
            &["kind"],
        )?;
        registry.register(Box::new(rewards_total.clone()))?;

        let proposals_per_tick = Histogram::with_opts(
            HistogramOpts::new(
                "dungeon_finder_proposals_per_tick",
                "Proposals formed by one matching pass",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0]),
        )?;
        registry.register(Box::new(proposals_per_tick.clone()))?;

        Ok(Self {
            joins_total,
            role_checks_total,
            proposals_total,
            boots_total,
            rewards_total,
            proposals_per_tick,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "dungeon_finder_tick_duration_seconds",
                "Engine update duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "dungeon_finder_request_duration_seconds",
                "Request handling duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["request"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let ticks_total = IntCounter::new("dungeon_finder_ticks_total", "Engine ticks run")?;
        registry.register(Box::new(ticks_total.clone()))?;

        Ok(Self {
            tick_duration,
            request_duration,
            ticks_total,
        })
    }
}
