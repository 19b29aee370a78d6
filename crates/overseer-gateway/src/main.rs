use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use overseer_core::config::{OverseerConfig, StorageBackend};
use overseer_scheduler::TaskService;
use overseer_store::TaskStore;

mod app;
mod http;
mod ws;

/// Retention sweep cadence. The sweep itself removes history entries older
/// than `storage.history_max_age_days`.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overseer=info,overseer_scheduler=info,tower_http=debug".into()),
        )
        .init();

    // load config: OVERSEER_CONFIG env > ~/.overseer/overseer.toml
    let config_path = std::env::var("OVERSEER_CONFIG").ok();
    let config = OverseerConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        OverseerConfig::default()
    });

    let store = build_store(&config)?;
    let broadcaster = Arc::new(ws::broadcast::EventBroadcaster::new());
    let publisher = Arc::new(ws::broadcast::BroadcastPublisher::new(Arc::clone(
        &broadcaster,
    )));
    let alerter = Arc::new(overseer_alerts::WebhookAlerter::new(&config.alerts));
    if alerter.enabled() {
        info!("webhook alerts enabled");
    }

    let service = Arc::new(TaskService::new(
        Arc::clone(&store),
        publisher,
        alerter,
        config.scheduler.clone(),
    ));
    service.start().await?;

    // Daily history retention sweep.
    let sweep_store = Arc::clone(&store);
    let max_age_days = config.storage.history_max_age_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match sweep_store.cleanup_old_history(max_age_days).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "history retention sweep"),
                Err(e) => warn!("history retention sweep failed: {e}"),
            }
        }
    });

    let state = Arc::new(app::AppState::new(
        config.clone(),
        Arc::clone(&service),
        store,
        broadcaster,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("Overseer gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the scheduler and terminate in-flight runs before exit.
    service.stop().await;
    Ok(())
}

/// Wire up the configured task store backend.
fn build_store(config: &OverseerConfig) -> anyhow::Result<Arc<dyn TaskStore>> {
    let store: Arc<dyn TaskStore> = match config.storage.backend {
        StorageBackend::Json => {
            info!(path = %config.storage.tasks_path, "using JSON task store");
            Arc::new(overseer_store::JsonStore::new(&config.storage.tasks_path)?)
        }
        StorageBackend::Sqlite => {
            info!(path = %config.storage.db_path, "using SQLite task store");
            Arc::new(overseer_store::SqliteStore::open(&config.storage.db_path)?)
        }
        StorageBackend::Memory => {
            warn!("using in-memory task store: definitions will not survive restart");
            Arc::new(overseer_store::MemoryStore::new())
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
