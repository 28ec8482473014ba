//! Main entry point for the dungeon finder service
//!
//! Loads configuration and dungeon data, connects to the broker, then runs
//! the engine tick loop until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use dungeon_finder::config::{validate_config, AppConfig};
use dungeon_finder::dungeon::load_catalog;
use dungeon_finder::service::{AppState, HealthCheck};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Dungeon Finder - role-based group matchmaking
#[derive(Parser)]
#[command(
    name = "dungeon-finder",
    version,
    about = "Matchmaking service that queues players by role and forms dungeon groups",
    long_about = "Dungeon Finder consumes join, leave, role check, proposal and vote kick \
                 requests over AMQP, matches tanks, healers and damage dealers into \
                 five-player groups and publishes every notification back to the broker."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Dungeon data override
    #[arg(long, value_name = "FILE", help = "Override dungeon data file")]
    data: Option<PathBuf>,

    /// Dry run mode (validate config and data, then exit)
    #[arg(
        long,
        help = "Validate configuration and dungeon data, then exit without starting"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C) signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received SIGINT (Ctrl+C) signal");
    }

    Ok(())
}

/// Log service health every 30 seconds
async fn health_check_task(app_state: Arc<tokio::sync::Mutex<AppState>>) {
    let probe = app_state.lock().await.probe();
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while probe.is_running().await {
        interval.tick().await;

        match HealthCheck::check(&probe).await {
            Ok(health) => info!(
                "Health check: {} - {} queued players, {} proposals, {} role checks",
                health.status,
                health.stats.queued_players,
                health.stats.proposals,
                health.stats.role_checks
            ),
            Err(e) => warn!("Health check failed: {}", e),
        }
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Dungeon Finder Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   Dungeon data: {}", config.service.dungeon_data_path);
    info!("   Tick interval: {}ms", config.service.tick_interval_ms);
    info!(
        "   Group: {} tank / {} healer / {} damage, cross faction: {}",
        config.lfg.tanks_needed,
        config.lfg.healers_needed,
        config.lfg.dps_needed,
        config.lfg.cross_faction
    );
}

/// Load configuration, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(data) = &args.data {
        config.service.dungeon_data_path = data.display().to_string();
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        let catalog = load_catalog(
            &config.service.dungeon_data_path,
            config.lfg.max_player_level,
        )?;
        info!(
            "Configuration and dungeon data valid ({} dungeons)",
            catalog.len()
        );
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let app_state = Arc::new(tokio::sync::Mutex::new(app_state));
    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("Dungeon finder is running, press Ctrl+C to stop");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Failed to listen for shutdown signals: {}", e);
    }

    info!("Shutdown signal received, beginning graceful shutdown");
    health_task.abort();

    let shutdown = async {
        let mut app_state = app_state.lock().await;
        debug!("Queue at shutdown:\n{}", app_state.queue_dump(true).await);
        app_state.shutdown().await
    };

    match tokio::time::timeout(config.shutdown_timeout(), shutdown).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    Ok(())
}
