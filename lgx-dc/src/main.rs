//! lgx-dc - Delivery confirmation capture and ERP synchronization
//!
//! Runs on the depot server, or on a driver device when `device_id` is
//! configured (offline queue enabled).

use anyhow::{Context, Result};
use clap::Parser;
use lgx_common::api::Actor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lgx_dc::config::{ServiceConfig, SERVICE_NAME};
use lgx_dc::services::{
    spawn_probe, Connectivity, DbSessionService, DbShipmentProvider, HttpErpClient,
};
use lgx_dc::{build_router, start_services, OfflineOptions, ServiceOptions};

#[derive(Debug, Parser)]
#[command(name = "lgx-dc", version, about = "Delivery confirmation capture and ERP sync")]
struct Args {
    /// Root folder for the database, photos and offline queue
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `bind_address`
    #[arg(long)]
    bind: Option<String>,

    /// Override `device_id` (enables the offline queue)
    #[arg(long)]
    device_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting lgx-dc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(device_id) = args.device_id {
        config.device_id = Some(device_id);
    }

    let root_folder = config.resolve_root_folder(args.root_folder.as_deref());
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = root_folder.join(format!("{}.db", SERVICE_NAME));
    info!("Database path: {}", db_path.display());
    let pool = lgx_dc::db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let sessions = Arc::new(DbSessionService::new(pool.clone()));
    for seed in &config.sessions {
        sessions
            .register(&seed.token, &Actor::new(seed.user_id.clone(), seed.role), None)
            .await?;
    }
    if !config.sessions.is_empty() {
        info!(count = config.sessions.len(), "Seeded sessions from configuration");
    }
    let expired = sessions.cleanup_expired().await?;
    if expired > 0 {
        info!(expired, "Removed expired sessions");
    }

    if config.erp.api_token.is_none() {
        warn!("No ERP API token configured; requests are sent unauthenticated");
    }
    let erp = Arc::new(HttpErpClient::new(
        config.erp.base_url.clone(),
        config.erp.api_token.clone(),
        Duration::from_secs(config.erp.request_timeout_secs.max(1)),
    )?);

    let cancel = CancellationToken::new();
    let connectivity = Connectivity::new(true);

    let mut options = ServiceOptions::new(root_folder.join("photos"));
    options.photo_limits = config.photos.limits();
    options.retry = config.sync.retry_policy();
    options.worker = config.sync.worker_config();
    options.event_capacity = config.event_capacity;
    options.batch_concurrency = config.sync.max_concurrent;
    if let Some(device_id) = &config.device_id {
        let mut offline = OfflineOptions::new(&root_folder, device_id.clone(), config.offline.queue_policy());
        offline.drain_interval = Duration::from_secs(config.offline.drain_interval_secs.max(1));
        options.offline = Some(offline);
    }

    let services = start_services(
        pool.clone(),
        erp,
        Arc::new(DbShipmentProvider::new(pool)),
        sessions,
        connectivity.clone(),
        options,
        cancel.clone(),
    )
    .await
    .context("Failed to start services")?;

    let mut probe = None;
    if let (Some(_), Some(url)) = (&config.device_id, &config.offline.probe_url) {
        info!("Connectivity probe: {}", url);
        probe = Some(spawn_probe(
            connectivity,
            url.clone(),
            Duration::from_secs(config.offline.probe_interval_secs.max(1)),
            cancel.clone(),
        ));
    }

    let app = build_router(services.state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("lgx-dc listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    services.join().await;
    if let Some(probe) = probe {
        let _ = probe.await;
    }
    info!("lgx-dc stopped");
    Ok(())
}
