//! 🎬 *[a file lands in the folder. nobody announced it.]*
//!
//! 📬 The DispatchWorker reads watch events, keeps the ones that look like XML files
//! that just appeared, and queues a job for each. When the job queue is full it waits.
//! That wait is the whole backpressure story, and it is enough.

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::Worker;
use crate::jobs::FileProcessingJob;
use crate::summary::IngestionSummary;
use crate::supervisors::watch::WatchEvent;

#[derive(Debug)]
pub(crate) struct DispatchWorker {
    events_rx: Receiver<WatchEvent>,
    jobs_tx: Sender<FileProcessingJob>,
}

impl DispatchWorker {
    pub(crate) fn new(events_rx: Receiver<WatchEvent>, jobs_tx: Sender<FileProcessingJob>) -> Self {
        Self { events_rx, jobs_tx }
    }
}

impl Worker for DispatchWorker {
    fn start(self) -> JoinHandle<Result<IngestionSummary>> {
        tokio::spawn(async move {
            debug!("📬 DispatchWorker started listening for watch events...");
            let mut summary = IngestionSummary::default();
            while let Ok(event) = self.events_rx.recv().await {
                if !event.is_ingestible() {
                    trace!("🙈 Ignoring {:?} for '{}'", event.kind, event.path.display());
                    continue;
                }
                info!("📂 Detected new file: {}", event.path.display());
                self.jobs_tx
                    .send(FileProcessingJob::new(event.path))
                    .await
                    .context("💀 DispatchWorker could not queue a job, every file worker is gone")?;
                summary.files_dispatched += 1;
            }
            // -- 🏁 event channel closed and drained. dropping jobs_tx lets the workers finish up.
            debug!(
                "🏁 DispatchWorker: event channel closed after {} file(s). Shutting down.",
                summary.files_dispatched
            );
            Ok(summary)
        })
    }
}
