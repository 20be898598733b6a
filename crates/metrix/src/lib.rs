//! 📊 metrix: watches a folder for XML drops, averages each product's metrics, and
//! ranks the products in Redis by that average.
//!
//! 🎬 *[narrator voice]* "A file appears. A mean is computed. A sorted set grows by one."
//!
//! Entry point for binaries is [`run`]. Everything else is public so it can be embedded
//! or poked at in isolation.

pub mod app_config;
pub mod common;
pub mod extractors;
pub mod jobs;
pub mod stores;
pub mod summary;
pub mod supervisors;

use anyhow::{Context, Result};
use tracing::info;

pub use app_config::{AppConfig, RuntimeConfig, StoreConfig, WatchConfig};
pub use common::ProductMetric;
pub use extractors::{MetricAccumulator, ParseError, ParseHandler, ParserEvent, StreamingMetricExtractor};
pub use jobs::{FileProcessingJob, JobOutcome, JobReport};
pub use stores::{InMemoryStore, MetricStore, RedisStore, RedisStoreConfig, StoreBackend, StoreError};
pub use summary::IngestionSummary;
pub use supervisors::IngestionDispatcher;

/// 🚀 Runs the whole pipeline until ctrl-c.
///
/// 1. make sure the watch directory exists
/// 2. connect to the store and ping it (unreachable store = startup failure)
/// 3. start watching, dispatching and processing
/// 4. on ctrl-c stop watching, let in-flight work finish, log the tally
pub async fn run(app_config: AppConfig) -> Result<IngestionSummary> {
    supervisors::watch::ensure_watch_directory(&app_config.watch.directory).await?;

    let store = StoreBackend::from_config(&app_config.store)
        .await
        .context("💀 Could not set up the metric store")?;
    store
        .ping()
        .await
        .context("💀 The metric store did not answer the startup ping")?;

    let mut dispatcher = IngestionDispatcher::new(
        app_config.watch.clone(),
        app_config.runtime.clone(),
        store,
    );
    dispatcher.start()?;
    info!(
        "👀 Started file watcher on directory: {}",
        app_config.watch.directory.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("💀 Could not listen for ctrl-c")?;
    info!("🛑 Shutdown requested, finishing in-flight files...");

    dispatcher.stop();
    let summary = dispatcher.join().await?;
    info!("📊 Ingestion summary:\n{}", summary.render_table());
    Ok(summary)
}
