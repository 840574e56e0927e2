//! Indicator service
//!
//! Scheduled indicator computation over the candle series maintained by the
//! sync service. Results land in the store (normalized rows) and the cache
//! (latest bundle per series).

use anyhow::Context;
use marketflow_core::Settings;
use marketflow_indicators::IndicatorEngine;
use marketflow_services::{init_tracing, shutdown_signal};
use marketflow_store::{CacheSink, ColumnarSink};
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
    let cache = Arc::new(
        CacheSink::connect(&settings)
            .await
            .context("connecting to cache")?,
    );

    let engine = Arc::new(IndicatorEngine::new(settings, store.clone(), cache.clone()));
    info!("indicator service starting");

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    shutdown_signal().await?;
    info!("shutdown signal received");

    engine.stop();
    let _ = runner.await;
    store.close().await;
    cache.close().await;

    info!("clean shutdown");
    Ok(())
}
