//! Probe Monitor: polls remote container probes, keeps an inventory of the
//! containers they report, records per-container resource samples and turns
//! lifecycle changes into events handed to external transports.
//!
//! A read-only JSON API exposes the inventory and the stats history.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use config::{Config, StorageConfig};
use event::Dispatcher;
use inventory::{FileInventory, InventoryStore, MySqlInventory};
use probe::Poller;
use reconcile::Reconciler;
use stats::{FileStats, MySqlStats, StatsStore};

pub mod api;
pub mod config;
pub mod container;
pub mod database;
pub mod error;
pub mod event;
pub mod fsutil;
pub mod inventory;
pub mod probe;
pub mod reconcile;
pub mod stats;

/// Runs the monitor until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Only boot-time failures are returned: an invalid event configuration, a
/// store that cannot be opened, a probe that cannot be registered or a probe
/// client that cannot be built. Failures during polling are logged and the
/// affected cycle is skipped.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Arc::new(Dispatcher::from_config(&config.event)?);

    match &config.storage {
        StorageConfig::File {
            inventory_path,
            stats_path,
        } => {
            log::info!(
                "using file storage (inventory `{}`, stats `{}`)",
                inventory_path.display(),
                stats_path.display()
            );
            let inventory = FileInventory::open(inventory_path)?;
            let stats = FileStats::open(stats_path)?;
            monitor(&config, inventory, stats, dispatcher).await
        }
        StorageConfig::Mysql { url } => {
            let url = url.as_deref().ok_or(config::Error::MissingDatabaseUrl)?;
            log::info!("using mysql storage");
            let db = database::connect(url).await?;
            let inventory = MySqlInventory::new(db.clone());
            let stats = MySqlStats::new(db);
            monitor(&config, inventory, stats, dispatcher).await
        }
    }
}

async fn monitor<I: InventoryStore, S: StatsStore>(
    config: &Config,
    inventory: I,
    stats: S,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), Box<dyn std::error::Error>> {
    let inventory = Arc::new(inventory);
    let stats = Arc::new(stats);
    let reconciler = Reconciler::new(Arc::clone(&inventory), Arc::clone(&stats), dispatcher);
    let shutdown = CancellationToken::new();

    let mut pollers = Vec::with_capacity(config.probes.len());
    for probe in &config.probes {
        inventory.register_probe(&probe.name).await?;
        let poller = Poller::new(probe.clone(), reconciler.clone())?;
        pollers.push(tokio::spawn(poller.run(shutdown.clone())));
    }
    log::info!("monitoring {} probes", pollers.len());

    let state =
        api::ApiState::new(inventory, stats, &config.probes).with_login(config.api.credentials());
    let api = api::APIServer::new(state);
    let listen = config.api.listen.clone();
    let api_shutdown = shutdown.clone();
    let api_task = tokio::spawn(async move {
        if let Err(err) = api.listen(listen, api_shutdown).await {
            log::error!("api server failed: {err}");
        }
    });

    shutdown_signal().await;
    log::info!("shutting down, waiting for pollers to finish their cycle");
    shutdown.cancel();

    for poller in pollers {
        if let Err(err) = poller.await {
            log::error!("poller task failed: {err}");
        }
    }
    if let Err(err) = api_task.await {
        log::error!("api task failed: {err}");
    }

    log::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                log::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
