//! Main application state and service coordination
//!
//! This module wires the dungeon finder engine to AMQP, the tick loop,
//! metrics and health endpoints. The engine sits behind a single
//! `tokio::sync::Mutex`, so requests and ticks never interleave.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{LfgRequestConsumer, MessageHandler};
use crate::amqp::messages::LfgRequest;
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::dungeon::{load_catalog, DungeonCatalog};
use crate::error::{LfgError, Result as LfgResult};
use crate::lfg::{BootStart, LfgManager, TickReport};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::persistence::InMemoryLfgStore;
use crate::service::health::ServiceProbe;
use crate::types::DungeonSet;
use crate::utils::{dungeon_id_from_entry, SystemClock};
use crate::world::{InMemoryWorld, PlayerDirectory};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The engine as shared between the consumer, the tick loop and health checks
pub type SharedEngine = Arc<Mutex<LfgManager<InMemoryWorld>>>;

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Applies requests and ticks to the engine, then publishes what it emitted
pub struct LfgRequestHandler {
    engine: SharedEngine,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl LfgRequestHandler {
    pub fn new(
        engine: SharedEngine,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            engine,
            publisher,
            metrics,
        }
    }

    /// Apply one request and publish the resulting notifications
    pub async fn apply(&self, request: LfgRequest) -> LfgResult<()> {
        let (events, outcomes) = {
            let mut engine = self.engine.lock().await;
            dispatch(&mut engine, request)?;
            (engine.drain_events(), engine.drain_outcomes())
        };

        self.metrics.record_outcomes(&outcomes);
        let count = self.publisher.publish_events(events).await?;
        debug!("Published {} events", count);
        Ok(())
    }

    /// Run one engine update
    pub async fn tick(&self, diff_ms: u64) -> LfgResult<TickReport> {
        let timer = self.metrics.start_timer();
        let (report, events, outcomes, sizes, lengths) = {
            let mut engine = self.engine.lock().await;
            let report = engine.update(diff_ms);
            (
                report,
                engine.drain_events(),
                engine.drain_outcomes(),
                engine.queue_sizes(),
                engine.queue_lengths(),
            )
        };

        self.metrics.record_tick(&report, timer.stop());
        self.metrics.record_outcomes(&outcomes);
        self.metrics.update_queue_sizes(&sizes, &lengths);

        if !report.new_proposals.is_empty() {
            info!("Matching pass formed proposals {:?}", report.new_proposals);
        }

        self.publisher.publish_events(events).await?;
        Ok(report)
    }
}

/// Route a request to the matching engine operation
fn dispatch(engine: &mut LfgManager<InMemoryWorld>, request: LfgRequest) -> LfgResult<()> {
    match request {
        LfgRequest::UpsertPlayer(snapshot) => {
            let player = snapshot.id;
            let online = snapshot.online;
            engine.world_mut().upsert_player(snapshot);
            if !online {
                engine.leave_lfg(player.into(), true);
            }
        }
        LfgRequest::UpsertGroup(snapshot) => {
            let group = snapshot.id;
            engine.world_mut().upsert_group(snapshot);
            engine.sync_group(group);
        }
        LfgRequest::Join {
            player_id,
            roles,
            dungeons,
            comment,
        } => {
            if engine.world().player(player_id).is_none() {
                return Err(LfgError::PlayerNotFound {
                    player_id: player_id.to_string(),
                }
                .into());
            }
            let dungeons: DungeonSet = dungeons.into_iter().map(dungeon_id_from_entry).collect();
            let result = engine.join_lfg(player_id, roles, dungeons, &comment);
            debug!("Join request from {} answered with {}", player_id, result);
        }
        LfgRequest::Leave {
            entity,
            disconnected,
        } => engine.leave_lfg(entity, disconnected),
        LfgRequest::RoleAnswer {
            group_id,
            player_id,
            roles,
        } => engine.update_role_check(group_id, Some(player_id), roles),
        LfgRequest::ProposalAnswer {
            proposal_id,
            player_id,
            accept,
        } => engine.update_proposal(proposal_id, player_id, accept),
        LfgRequest::InitBoot {
            group_id,
            kicker,
            victim,
            reason,
        } => {
            let started = engine.init_boot(group_id, kicker, victim, &reason);
            if started != BootStart::Started {
                warn!(
                    "Vote kick of {} by {} in {} refused: {:?}",
                    victim, kicker, group_id, started
                );
            }
        }
        LfgRequest::BootVote { player_id, accept } => {
            if let Some(passed) = engine.update_boot(player_id, accept) {
                debug!("Vote kick decided by {}: passed={}", player_id, passed);
            }
        }
        LfgRequest::FinishDungeon {
            group_id,
            dungeon_id,
            map_id,
        } => {
            let rewarded = engine.finish_dungeon(group_id, dungeon_id, map_id);
            debug!("{} finished dungeon {}, {} rewards", group_id, dungeon_id, rewarded);
        }
        LfgRequest::Teleport { player_id, out } => {
            let _ = engine.teleport_player(player_id, out, true);
        }
    }
    Ok(())
}

#[async_trait]
impl MessageHandler for LfgRequestHandler {
    async fn handle_request(&self, request: LfgRequest) -> LfgResult<()> {
        let kind = request.kind();
        let start_time = Instant::now();

        let result = self.apply(request).await;
        let elapsed = start_time.elapsed();
        self.metrics.record_request(kind, result.is_ok(), elapsed);

        match &result {
            Ok(()) => debug!(
                "Request '{}' handled in {:.2}ms",
                kind,
                elapsed.as_secs_f64() * 1000.0
            ),
            Err(e) => warn!(
                "Request '{}' failed after {:.2}ms: {}",
                kind,
                elapsed.as_secs_f64() * 1000.0,
                e
            ),
        }
        result
    }

    async fn handle_error(&self, error: LfgError, message_data: &[u8]) {
        error!(
            "Dropping message - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    engine: SharedEngine,
    handler: Arc<LfgRequestHandler>,
    metrics_service: Arc<MetricsService>,
    /// Absent when running without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,
    background_tasks: Vec<JoinHandle<()>>,
    request_consumer: Option<LfgRequestConsumer>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Initialize the application: load dungeon data, connect to the broker
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing dungeon finder service");
        info!(
            "Configuration: service={}, amqp_url={}, data={}",
            config.service.name, config.amqp.url, config.service.dungeon_data_path
        );

        let catalog = Self::load_dungeons(&config)?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;
        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Self::assemble(config, catalog, Arc::new(publisher), Some(amqp_connection))
    }

    /// Build the service around an existing catalog and publisher, without a broker
    pub fn offline(
        config: AppConfig,
        catalog: DungeonCatalog,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        Self::assemble(config, catalog, publisher, None)
    }

    fn assemble(
        config: AppConfig,
        catalog: DungeonCatalog,
        publisher: Arc<dyn EventPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let manager = LfgManager::new(
            config.lfg.clone(),
            Arc::new(catalog),
            InMemoryWorld::new(),
            Arc::new(SystemClock),
        )
        .with_store(Arc::new(InMemoryLfgStore::new()));
        let engine: SharedEngine = Arc::new(Mutex::new(manager));

        let collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let is_running = Arc::new(RwLock::new(false));
        let started_at = Instant::now();
        let probe = ServiceProbe {
            service_name: config.service.name.clone(),
            engine: engine.clone(),
            amqp_connection: amqp_connection.clone(),
            is_running: is_running.clone(),
            started_at,
        };

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, collector.clone()).with_probe(probe));
        let metrics_service = Arc::new(MetricsService::new(collector.clone(), health_server));

        let handler = Arc::new(LfgRequestHandler::new(
            engine.clone(),
            publisher,
            collector,
        ));

        Ok(Self {
            config,
            engine,
            handler,
            metrics_service,
            amqp_connection,
            background_tasks: Vec::new(),
            request_consumer: None,
            is_running,
            started_at,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting dungeon finder service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        } else {
            warn!("No AMQP connection, requests will not be consumed");
        }
        self.start_tick_loop();

        info!("Dungeon finder service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of dungeon finder service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.request_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        let final_sizes = self.engine.lock().await.queue_sizes();
        info!("Final queue sizes: {:?}", final_sizes);
        info!("Dungeon finder service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine(&self) -> SharedEngine {
        self.engine.clone()
    }

    pub fn handler(&self) -> Arc<LfgRequestHandler> {
        self.handler.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    /// Snapshot used by health checks
    pub fn probe(&self) -> ServiceProbe {
        ServiceProbe {
            service_name: self.config.service.name.clone(),
            engine: self.engine.clone(),
            amqp_connection: self.amqp_connection.clone(),
            is_running: self.is_running.clone(),
            started_at: self.started_at,
        }
    }

    fn load_dungeons(config: &AppConfig) -> Result<DungeonCatalog, ServiceError> {
        let catalog = load_catalog(
            &config.service.dungeon_data_path,
            config.lfg.max_player_level,
        )
        .map_err(|e| ServiceError::Configuration {
            message: format!(
                "Failed to load dungeon data from {}: {}",
                config.service.dungeon_data_path, e
            ),
        })?;
        info!("Loaded {} dungeons", catalog.len());
        Ok(catalog)
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        info!("Metrics and health endpoints starting on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = self.amqp_connection.clone() else {
            return Ok(());
        };
        let queue_name = self.config.amqp.queue_name.clone();

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let consumer = LfgRequestConsumer::new(self.handler.clone(), channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.request_consumer = Some(consumer);
        info!("Listening for dungeon finder requests on '{}'", queue_name);
        Ok(())
    }

    /// Drive `LfgManager::update` at the configured tick interval
    fn start_tick_loop(&mut self) {
        let handler = self.handler.clone();
        let is_running = self.is_running.clone();
        let tick_interval = self.config.tick_interval();

        let tick_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_tick = Instant::now();
            info!("Engine tick loop started ({:?})", tick_interval);

            while *is_running.read().await {
                interval.tick().await;
                let now = Instant::now();
                let diff_ms = now.duration_since(last_tick).as_millis() as u64;
                last_tick = now;

                if let Err(e) = handler.tick(diff_ms).await {
                    warn!("Engine tick failed to publish: {}", e);
                }
            }

            info!("Engine tick loop stopped");
        });
        self.background_tasks.push(tick_task);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Entities currently queued, for diagnostics
    pub async fn queue_dump(&self, full: bool) -> String {
        self.engine.lock().await.dump_queue_info(full)
    }
}
