//! Candle sync service
//!
//! Scheduled REST synchronization of authoritative closed candles into the
//! columnar store: initial backfill, then a cycle every sync interval.

use anyhow::Context;
use marketflow_core::Settings;
use marketflow_services::{init_tracing, shutdown_signal};
use marketflow_store::ColumnarSink;
use marketflow_sync::CandleSync;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Settings::load().context("loading configuration")?;
    let store = Arc::new(
        ColumnarSink::connect(&settings)
            .await
            .context("connecting to store")?,
    );

    let service = Arc::new(CandleSync::new(settings, store.clone()));
    info!("candle sync service starting");

    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.start().await })
    };

    shutdown_signal().await?;
    info!("shutdown signal received");

    service.stop();
    let _ = runner.await;
    store.close().await;

    info!("clean shutdown");
    Ok(())
}
