//! Multi-exchange ingestion service
//!
//! Wires every enabled exchange stream to one shared [`StreamProcessor`]:
//! callbacks are registered, per-client consumer pools started, then all
//! reader loops run concurrently until `stop()`.

use crate::error::Result;
use crate::processor::StreamProcessor;
use futures::FutureExt;
use futures::future::join_all;
use marketflow_core::Settings;
use marketflow_exchange::factory::create_enabled_streams;
use marketflow_exchange::stream::ExchangeStream;
use marketflow_store::CacheSink;
use std::sync::Arc;
use tracing::{error, info};

pub struct IngestService {
    streams: Vec<Arc<dyn ExchangeStream>>,
    processor: Arc<StreamProcessor>,
}

impl IngestService {
    pub fn new(settings: &Settings, cache: Arc<CacheSink>) -> Result<Self> {
        let streams = create_enabled_streams(settings)?;
        let processor = Arc::new(StreamProcessor::new(cache, settings.spike_threshold_pct));

        info!(exchanges = streams.len(), "ingest service created");

        Ok(Self { streams, processor })
    }

    /// Register callbacks, start consumers and run every reader loop until
    /// `stop()` ends them.
    pub async fn start(&self) -> Result<()> {
        // Callbacks first: consumer pools snapshot the registry on start
        for stream in &self.streams {
            let processor = self.processor.clone();
            stream.router().on_trade(Arc::new(move |trade| {
                let processor = processor.clone();
                async move { processor.process_trade(trade).await }.boxed()
            }));

            let processor = self.processor.clone();
            stream.router().on_orderbook(Arc::new(move |book| {
                let processor = processor.clone();
                async move { processor.process_orderbook(book).await }.boxed()
            }));
        }

        for stream in &self.streams {
            stream.connect().await?;
            stream.router().start_consumers(stream.exchange()).await;
        }

        info!(exchanges = self.streams.len(), "starting reader loops");

        let readers = self.streams.iter().cloned().map(|stream| {
            tokio::spawn(async move {
                if let Err(e) = stream.start().await {
                    error!(exchange = %stream.exchange(), "reader loop failed: {e}");
                }
            })
        });
        join_all(readers).await;

        info!("all reader loops ended");
        Ok(())
    }

    /// Stop readers, then drain and stop the consumer pools.
    pub async fn stop(&self) {
        for stream in &self.streams {
            stream.stop().await;
        }
        for stream in &self.streams {
            stream.router().stop_consumers().await;
            let dropped = stream.router().dropped_count();
            if dropped > 0 {
                info!(exchange = %stream.exchange(), dropped, "consumer queue drops");
            }
        }

        let stats = self.processor.stats();
        info!(
            spikes = stats.spike_count,
            invalid = stats.invalid_count,
            symbols = stats.symbols_tracked,
            "ingest service stopped"
        );
    }
}
