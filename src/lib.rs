//! Energy Price Crawler
//!
//! Fetches per-postal-code energy prices for configured countries, persists
//! the raw payloads, transforms them into a star schema and exposes a live
//! websocket control channel with an interval scheduler.

// Module declarations
pub mod control;
pub mod crawling;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::{ControlHub, ControlPanel, SchedulerLoop};
use crate::crawling::Orchestrator;
use crate::domain::events::{EventBus, EventSink};
use crate::infrastructure::{
    AppConfig, CsvGeoImporter, DatabaseConnection, GeoImporter, HttpClient, PageFetcher, PriceRepository,
};

/// Wire every component together and serve the control channel until Ctrl-C.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let database = DatabaseConnection::new(&config.database).await?;
    database.migrate().await?;
    let repository = PriceRepository::new(database.pool().clone());

    let (bus, event_rx) = EventBus::channel();
    let events: Arc<dyn EventSink> = Arc::new(bus);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpClient::new(&config.fetch)?);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        repository,
        fetcher,
        Arc::clone(&events),
    ));
    orchestrator
        .transform_engine()
        .init_cache()
        .await
        .context("Failed to initialize dimension caches")?;
    orchestrator.init_tasks().await?;

    let hub = Arc::new(ControlHub::new(config.scheduler.verbose_log));
    let scheduler = Arc::new(SchedulerLoop::new(
        &config.scheduler,
        Arc::clone(&orchestrator),
        Arc::clone(&events),
    ));
    let importer: Arc<dyn GeoImporter> = Arc::new(CsvGeoImporter::new(database.pool().clone(), Arc::clone(&events)));
    let panel = Arc::new(ControlPanel::new(
        Arc::clone(&orchestrator),
        Arc::clone(&scheduler),
        Arc::clone(&hub),
        importer,
        events,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let hub = Arc::clone(&hub);
        let shutdown = shutdown.clone();
        async move { hub.pump(event_rx, shutdown).await }
    });
    tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(&config.control.bind_address)
        .await
        .with_context(|| format!("Failed to bind control channel on {}", config.control.bind_address))?;
    control::server::serve(listener, panel, shutdown.clone()).await?;

    orchestrator.stop_workers().await;
    database.pool().close().await;
    info!("Energy price crawler stopped");
    Ok(())
}
