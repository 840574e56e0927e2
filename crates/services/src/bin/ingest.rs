//! Market data ingestion service
//!
//! WebSocket streams from every enabled exchange into the signal cache.
//! Candles come from the sync service; this process only carries real-time
//! price signals.

use anyhow::Context;
use marketflow_core::Settings;
use marketflow_ingest::IngestService;
use marketflow_services::{init_tracing, shutdown_signal};
use marketflow_store::CacheSink;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Settings::load().context("loading configuration")?;
    let cache = Arc::new(
        CacheSink::connect(&settings)
            .await
            .context("connecting to cache")?,
    );

    let service = Arc::new(IngestService::new(&settings, cache.clone())?);
    info!("market data ingestion service starting");

    let runner = {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = service.start().await {
                tracing::error!("ingest service failed: {e}");
            }
        })
    };

    shutdown_signal().await?;
    info!("shutdown signal received");

    service.stop().await;
    let _ = runner.await;
    cache.close().await;

    info!("clean shutdown");
    Ok(())
}
