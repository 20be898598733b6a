//! 🗑️ The FileWorker: patient, tireless, and deeply unbothered by the chaos upstream.
//! It receives jobs. It runs jobs. It asks no questions.
//!
//! 🦆 (the duck has no comment at this time)
//!
//! ⚠️ A job that panics does not take the worker with it. The panic is caught at the
//! job boundary, logged, and counted as a failed file. The worker goes back to the queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use anyhow::Result;
use async_channel::Receiver;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Worker;
use crate::jobs::{FileProcessingJob, JobReport};
use crate::stores::StoreBackend;
use crate::summary::IngestionSummary;

#[derive(Debug)]
pub(crate) struct FileWorker {
    worker_id: usize,
    rx: Receiver<FileProcessingJob>,
    store: StoreBackend,
}

impl FileWorker {
    pub(crate) fn new(worker_id: usize, rx: Receiver<FileProcessingJob>, store: StoreBackend) -> Self {
        Self { worker_id, rx, store }
    }
}

impl Worker for FileWorker {
    fn start(self) -> JoinHandle<Result<IngestionSummary>> {
        tokio::spawn(async move {
            debug!("📥 FileWorker #{} started draining the job queue...", self.worker_id);
            let mut summary = IngestionSummary::default();
            while let Ok(job) = self.rx.recv().await {
                let path = job.path().to_path_buf();
                let started = Instant::now();
                let report = match AssertUnwindSafe(job.run(&self.store)).catch_unwind().await {
                    Ok(report) => report,
                    Err(panic) => {
                        let cause = panic_message(panic.as_ref());
                        error!(
                            "💀 FileWorker #{} caught a panic while processing '{}': {}",
                            self.worker_id,
                            path.display(),
                            cause
                        );
                        JobReport::crashed(path, format!("panicked: {cause}"), started.elapsed())
                    }
                };
                summary.record(&report);
            }
            debug!("🏁 FileWorker #{}: job queue closed. Shutting down.", self.worker_id);
            Ok(summary)
        })
    }
}

/// 🧯 Panic payloads are `&str` or `String` nearly always. Anything else gets a shrug.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStore;

    #[test]
    fn the_one_where_panic_payloads_are_read_aloud() {
        assert_eq!(panic_message(&"kaboom"), "kaboom");
        assert_eq!(panic_message(&String::from("kablam")), "kablam");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }

    #[tokio::test]
    async fn the_one_where_the_worker_drains_the_queue_and_clocks_out() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("good.xml");
        std::fs::write(&good, r#"<product id="G"><metric_z>4</metric_z></product>"#)?;
        let store = InMemoryStore::new();
        let (tx, rx) = async_channel::bounded(4);

        let handle = FileWorker::new(0, rx, StoreBackend::InMemory(store.clone())).start();
        tx.send(FileProcessingJob::new(&good)).await?;
        tx.send(FileProcessingJob::new(dir.path().join("missing.xml"))).await?;
        drop(tx);

        let summary = handle.await??;
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.records_stored, 1);
        assert_eq!(store.rank_score("G").await, Some(4.0));
        Ok(())
    }
}
