//! 🧵 Workers: the ones who actually do the work while the dispatcher takes all the
//! credit in the sprint retro.
//!
//! Two kinds. One [`DispatchWorker`] turns watch events into jobs, and a pool of
//! [`FileWorker`]s turns jobs into stored metrics. They only talk through channels.
//! When the channel in front of a worker closes and drains, the worker clocks out and
//! hands back its tally.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::summary::IngestionSummary;

mod dispatch_worker;
mod file_worker;

pub(crate) use dispatch_worker::DispatchWorker;
pub(crate) use file_worker::FileWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" (Seinfeld, on Rust)
pub(crate) trait Worker {
    /// 🚀 Spawns the worker. The handle resolves to what the worker did once its input closes.
    fn start(self) -> JoinHandle<Result<IngestionSummary>>;
}
