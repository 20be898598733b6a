//! 👀 watch.rs: staring at a folder so you don't have to.
//!
//! Wraps `notify` into something the dispatcher can consume: a plain [`WatchEvent`]
//! per path, pushed into an `async-channel`. The notify callback runs on notify's own
//! thread, so it only ever does a non-blocking `try_send` and goes back to sleep.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_channel::Sender;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// 🏷️ The only distinction the dispatcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// 🐣 Something appeared: created in place, or renamed into the directory.
    Created,
    /// 🤷 Modified, removed, accessed, renamed away. Not our business.
    Other,
}

/// 📡 One path, one kind of change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind: WatchEventKind::Created,
            path: path.into(),
            is_dir,
        }
    }

    /// 🚦 Created, not a directory, and the file name ends in `.xml` (lowercase, exactly).
    pub fn is_ingestible(&self) -> bool {
        self.kind == WatchEventKind::Created
            && !self.is_dir
            && self
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".xml"))
    }

    /// 🔄 Flattens one notify event into one [`WatchEvent`] per path.
    ///
    /// A rename *into* the directory (`Modify(Name(To))`) counts as created, so writers that
    /// stage a file elsewhere and move it in atomically get picked up too. When notify doesn't
    /// say whether a created path is a file or a folder, we ask the filesystem.
    pub fn from_notify(event: notify::Event) -> Vec<WatchEvent> {
        let created_hint = match event.kind {
            EventKind::Create(CreateKind::File) => Some(Some(false)),
            EventKind::Create(CreateKind::Folder) => Some(Some(true)),
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                Some(None)
            }
            _ => None,
        };

        event
            .paths
            .into_iter()
            .map(|path| match created_hint {
                Some(Some(is_dir)) => WatchEvent::created(path, is_dir),
                Some(None) => {
                    let is_dir = path.is_dir();
                    WatchEvent::created(path, is_dir)
                }
                None => WatchEvent {
                    kind: WatchEventKind::Other,
                    path,
                    is_dir: false,
                },
            })
            .collect()
    }
}

/// 👀 A live, non-recursive subscription. Dropping it ends the subscription.
pub struct DirectoryWatcher {
    // -- 🔒 never read, only kept alive. the day this is dropped, the events stop.
    _watcher: RecommendedWatcher,
    directory: PathBuf,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("directory", &self.directory)
            .finish()
    }
}

impl DirectoryWatcher {
    /// 🚀 Subscribes to `directory` (direct children only) and forwards every event into `tx`.
    pub fn subscribe(directory: &Path, tx: Sender<WatchEvent>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for watch_event in WatchEvent::from_notify(event) {
                        if tx.try_send(watch_event).is_err() {
                            // -- 🚪 the dispatcher hung up. stop() was called, nothing to do.
                            debug!("🚪 Watch event dropped, event channel is closed");
                            return;
                        }
                    }
                }
                Err(err) => warn!("⚠️ Watch error: {}", err),
            }
        })
        .context("💀 Could not create a filesystem watcher")?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("💀 Could not watch directory '{}'", directory.display()))?;

        Ok(Self {
            _watcher: watcher,
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// 📂 Makes sure the watch directory exists, creating it (and parents) if needed.
/// A regular file squatting on the path is an error, not something we paper over.
pub async fn ensure_watch_directory(directory: &Path) -> Result<()> {
    match tokio::fs::metadata(directory).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => bail!(
            "💀 Watch path '{}' exists but is not a directory",
            directory.display()
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(directory).await.with_context(|| {
                format!("💀 Could not create watch directory '{}'", directory.display())
            })?;
            info!("📁 Created watch directory: {}", directory.display());
            Ok(())
        }
        Err(err) => Err(err).with_context(|| {
            format!("💀 Could not inspect watch directory '{}'", directory.display())
        }),
    }
}
