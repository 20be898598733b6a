//! 🎬 *[camera pans across a dimly lit folder]*
//! 🎬 "In a world where files appear without warning..."
//! 🎬 "One dispatcher dared to watch them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The supervisor module: part middle manager, part helicopter parent.
//!
//! ```text
//!  notify ──▶ event channel ──▶ DispatchWorker ──▶ job queue (bounded) ──▶ FileWorker × N ──▶ store
//!  (unbounded)                   filter .xml        backpressure here
//! ```
//!
//! ⚠️ The workers stay private. Like Fight Club, but for async tasks.

pub mod watch;
mod workers;

use anyhow::{Context, Result, bail};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app_config::{RuntimeConfig, WatchConfig};
use crate::jobs::FileProcessingJob;
use crate::stores::StoreBackend;
use crate::summary::IngestionSummary;
use watch::{DirectoryWatcher, WatchEvent};
use workers::{DispatchWorker, FileWorker, Worker};

/// 📦 Owns the watch subscription and the worker pool behind it.
///
/// Lifecycle: [`start`](Self::start) once, [`stop`](Self::stop) when you've had enough,
/// then [`join`](Self::join) to wait for the stragglers and collect the tally.
/// `join` without `stop` waits until something else closes the event channel, which
/// for a live watcher means forever.
#[derive(Debug)]
pub struct IngestionDispatcher {
    watch_config: WatchConfig,
    runtime_config: RuntimeConfig,
    store: StoreBackend,
    watcher: Option<DirectoryWatcher>,
    events_tx: Option<Sender<WatchEvent>>,
    dispatch_handle: Option<JoinHandle<Result<IngestionSummary>>>,
    worker_handles: Vec<JoinHandle<Result<IngestionSummary>>>,
}

impl IngestionDispatcher {
    pub fn new(watch_config: WatchConfig, runtime_config: RuntimeConfig, store: StoreBackend) -> Self {
        Self {
            watch_config,
            runtime_config,
            store,
            watcher: None,
            events_tx: None,
            dispatch_handle: None,
            worker_handles: Vec::new(),
        }
    }

    /// 🚀 Subscribes to the watch directory and spawns the dispatcher plus the worker pool.
    ///
    /// 💀 Errors if called twice, or if the directory can't be watched.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_not_started()?;
        let (events_tx, events_rx) = async_channel::unbounded();
        let watcher = DirectoryWatcher::subscribe(&self.watch_config.directory, events_tx.clone())?;
        self.spawn_pipeline(events_rx);
        self.watcher = Some(watcher);
        self.events_tx = Some(events_tx);
        Ok(())
    }

    /// 🧪 Same pipeline, no filesystem. Whoever holds the sender plays the part of notify.
    #[cfg(test)]
    pub(crate) fn start_with_synthetic_events(&mut self) -> Result<Sender<WatchEvent>> {
        self.ensure_not_started()?;
        let (events_tx, events_rx) = async_channel::unbounded();
        self.spawn_pipeline(events_rx);
        self.events_tx = Some(events_tx.clone());
        Ok(events_tx)
    }

    /// 🛑 Ends the subscription and closes the event channel. Events already received and
    /// jobs already queued still run to completion. Nothing is cancelled.
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            info!("🛑 Stopped file watcher on directory: {}", watcher.directory().display());
        }
        if let Some(events_tx) = self.events_tx.take() {
            events_tx.close();
        }
    }

    /// ⏳ Waits for the dispatcher and every worker, then adds up what they did.
    pub async fn join(mut self) -> Result<IngestionSummary> {
        let mut summary = IngestionSummary::default();
        if let Some(dispatch_handle) = self.dispatch_handle.take() {
            let dispatched = dispatch_handle
                .await
                .context("💀 The dispatcher task panicked")??;
            summary.merge(&dispatched);
        }
        for worker_handle in self.worker_handles.drain(..) {
            let worked = worker_handle
                .await
                .context("💀 A file worker task panicked")??;
            summary.merge(&worked);
        }
        debug!("🏁 All workers joined: {:?}", summary);
        Ok(summary)
    }

    fn ensure_not_started(&self) -> Result<()> {
        if self.dispatch_handle.is_some() {
            bail!("💀 IngestionDispatcher was already started. Once is plenty.");
        }
        Ok(())
    }

    fn spawn_pipeline(&mut self, events_rx: async_channel::Receiver<WatchEvent>) {
        let (jobs_tx, jobs_rx) =
            async_channel::bounded::<FileProcessingJob>(self.runtime_config.queue_capacity);

        self.worker_handles = (0..self.runtime_config.worker_parallelism)
            .map(|worker_id| FileWorker::new(worker_id, jobs_rx.clone(), self.store.clone()).start())
            .collect();
        // -- 🔒 the workers hold the only receivers now
        drop(jobs_rx);

        self.dispatch_handle = Some(DispatchWorker::new(events_rx, jobs_tx).start());
        debug!(
            "🧵 Spawned 1 dispatcher and {} file worker(s), queue capacity {}",
            self.runtime_config.worker_parallelism, self.runtime_config.queue_capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{InMemoryStore, MetricStore};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn dispatcher_for(directory: &Path, store: &InMemoryStore, workers: usize) -> IngestionDispatcher {
        IngestionDispatcher::new(
            WatchConfig {
                directory: directory.to_path_buf(),
            },
            RuntimeConfig {
                queue_capacity: 2,
                worker_parallelism: workers,
            },
            StoreBackend::InMemory(store.clone()),
        )
    }

    fn write_xml(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    async fn wait_for_product(store: &InMemoryStore, product_id: &str) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if store.rank_score(product_id).await.is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .with_context(|| format!("💀 {product_id} never showed up in the store"))
    }

    #[tokio::test]
    async fn the_one_where_directories_and_text_files_are_ignored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(dir.path(), &store, 2);
        let events = dispatcher.start_with_synthetic_events()?;

        events.send(WatchEvent::created(dir.path().join("folder.xml"), true)).await?;
        events.send(WatchEvent::created(dir.path().join("notes.txt"), false)).await?;
        dispatcher.stop();
        let summary = dispatcher.join().await?;

        assert_eq!(summary.files_dispatched, 0);
        assert_eq!(store.product_count().await, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_two_files_at_once_both_make_it() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = write_xml(
            dir.path(),
            "first.xml",
            r#"<product id="F1"><metric_x>2</metric_x><metric_y>4</metric_y></product>"#,
        )?;
        let second = write_xml(
            dir.path(),
            "second.xml",
            r#"<catalog><product id="S1"><metric_z>9</metric_z></product><product id="S2"><metric_x>1</metric_x></product></catalog>"#,
        )?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(dir.path(), &store, 2);
        let events = dispatcher.start_with_synthetic_events()?;

        events.send(WatchEvent::created(&first, false)).await?;
        events.send(WatchEvent::created(&second, false)).await?;
        dispatcher.stop();
        let summary = dispatcher.join().await?;

        assert_eq!(summary.files_dispatched, 2);
        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.records_stored, 3);
        assert_eq!(store.rank_score("F1").await, Some(3.0));
        assert_eq!(store.rank_score("S1").await, Some(9.0));
        assert_eq!(
            store.fetch("S2").await?.map(|p| p.source_file),
            Some("second.xml".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_broken_file_does_not_stop_the_next_one() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let broken = write_xml(dir.path(), "broken.xml", "<catalog><product id=\"X\">")?;
        let fine = write_xml(
            dir.path(),
            "fine.xml",
            r#"<product id="OK"><metric_x>7</metric_x></product>"#,
        )?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(dir.path(), &store, 1);
        let events = dispatcher.start_with_synthetic_events()?;

        events.send(WatchEvent::created(&broken, false)).await?;
        events.send(WatchEvent::created(&fine, false)).await?;
        dispatcher.stop();
        let summary = dispatcher.join().await?;

        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(store.rank_score("OK").await, Some(7.0));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_starting_twice_is_a_caller_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(dir.path(), &store, 1);

        let _events = dispatcher.start_with_synthetic_events()?;
        assert!(dispatcher.start().is_err());

        dispatcher.stop();
        dispatcher.join().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_a_real_file_is_dropped_into_a_real_folder() -> Result<()> {
        let watched = tempfile::tempdir()?;
        let staging = tempfile::tempdir()?;
        write_xml(
            watched.path(),
            "already_here.xml",
            r#"<product id="OLD"><metric_x>1</metric_x></product>"#,
        )?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(watched.path(), &store, 2);
        dispatcher.start()?;

        // -- 📦 stage it elsewhere, then move it in whole, so the worker never sees half a file
        let staged = write_xml(
            staging.path(),
            "a.xml",
            r#"<product id="P1"><metric_x>10</metric_x><metric_y>20</metric_y></product>"#,
        )?;
        std::fs::rename(&staged, watched.path().join("a.xml"))?;
        std::fs::create_dir(watched.path().join("subdir.xml"))?;

        wait_for_product(&store, "P1").await?;
        dispatcher.stop();
        let summary = dispatcher.join().await?;

        assert_eq!(store.rank_score("P1").await, Some(15.0));
        assert_eq!(
            store.fetch("P1").await?.map(|p| p.source_file),
            Some("a.xml".to_string())
        );
        assert_eq!(store.rank_score("OLD").await, None, "💀 files present at startup are not ours");
        assert!(summary.files_dispatched >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_watching_a_missing_folder_fails_loudly() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = InMemoryStore::new();
        let mut dispatcher = dispatcher_for(&dir.path().join("nope"), &store, 1);

        assert!(dispatcher.start().is_err());
        Ok(())
    }
}
