//! Shared key-value configuration store.
//!
//! Both the watcher and the control-surface commands read and write the same
//! two keys, `toggleEnabled` and `filterText`. Subscribers are told about
//! every value change as a [`StorageChange`], no matter who wrote it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{CartwatchError, Result};

pub const KEY_TOGGLE_ENABLED: &str = "toggleEnabled";
pub const KEY_FILTER_TEXT: &str = "filterText";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// The persisted configuration. Missing keys read as `false` / `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(rename = "toggleEnabled", default)]
    pub enabled: bool,
    #[serde(rename = "filterText", default)]
    pub filter_text: String,
}

/// One key's transition, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    ToggleEnabled { old_value: bool, new_value: bool },
    FilterText { old_value: String, new_value: String },
}

impl StorageChange {
    /// Storage key this change belongs to.
    pub fn key(&self) -> &'static str {
        match self {
            StorageChange::ToggleEnabled { .. } => KEY_TOGGLE_ENABLED,
            StorageChange::FilterText { .. } => KEY_FILTER_TEXT,
        }
    }

    /// Changes needed to go from `old` to `new`, `toggleEnabled` first.
    pub fn diff(old: &Configuration, new: &Configuration) -> Vec<StorageChange> {
        let mut changes = Vec::new();
        if old.enabled != new.enabled {
            changes.push(StorageChange::ToggleEnabled {
                old_value: old.enabled,
                new_value: new.enabled,
            });
        }
        if old.filter_text != new.filter_text {
            changes.push(StorageChange::FilterText {
                old_value: old.filter_text.clone(),
                new_value: new.filter_text.clone(),
            });
        }
        changes
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Configuration>;

    async fn set_enabled(&self, enabled: bool) -> Result<()>;

    async fn set_filter_text(&self, text: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

#[async_trait]
impl<T: ConfigStore + ?Sized> ConfigStore for Arc<T> {
    async fn load(&self) -> Result<Configuration> {
        (**self).load().await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        (**self).set_enabled(enabled).await
    }

    async fn set_filter_text(&self, text: &str) -> Result<()> {
        (**self).set_filter_text(text).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        (**self).subscribe()
    }
}

/// Last known configuration plus the change fan-out shared by both stores.
struct ChangeFeed {
    snapshot: Mutex<Configuration>,
    tx: broadcast::Sender<StorageChange>,
}

impl ChangeFeed {
    fn new(initial: Configuration) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            snapshot: Mutex::new(initial),
            tx,
        }
    }

    fn publish(&self, old: &Configuration, new: &Configuration) {
        for change in StorageChange::diff(old, new) {
            tracing::debug!(key = change.key(), "storage changed");
            let _ = self.tx.send(change);
        }
    }
}

/// In-process store. Used by tests and embedders that do not need persistence.
pub struct MemoryStore {
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(initial: Configuration) -> Self {
        Self {
            feed: ChangeFeed::new(initial),
        }
    }

    async fn update(&self, edit: impl FnOnce(&mut Configuration) + Send) {
        let mut current = self.feed.snapshot.lock().await;
        let old = current.clone();
        edit(&mut *current);
        self.feed.publish(&old, &current);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self) -> Result<Configuration> {
        Ok(self.feed.snapshot.lock().await.clone())
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|c| c.enabled = enabled).await;
        Ok(())
    }

    async fn set_filter_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.update(move |c| c.filter_text = text).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.feed.tx.subscribe()
    }
}

/// JSON-file store shared between processes.
///
/// Writes through this instance notify subscribers immediately. Writes made
/// by other processes are picked up by [`FileStore::watch`].
pub struct FileStore {
    path: PathBuf,
    feed: ChangeFeed,
}

impl FileStore {
    /// Open the store at `path`. A missing file reads as the default configuration.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial = read_file(&path).await?;
        Ok(Self {
            path,
            feed: ChangeFeed::new(initial),
        })
    }

    /// Default location: `<data_local_dir>/cartwatch/storage.json`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().ok_or_else(|| {
            CartwatchError::StorageError("Cannot determine local data directory".to_string())
        })?;
        Ok(data_dir.join("cartwatch").join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish any difference from the last snapshot.
    pub async fn poll_changes(&self) -> Result<()> {
        let mut snapshot = self.feed.snapshot.lock().await;
        let on_disk = read_file(&self.path).await?;
        if *snapshot != on_disk {
            self.feed.publish(&snapshot, &on_disk);
            *snapshot = on_disk;
        }
        Ok(())
    }

    /// Poll the file every `every` until `shutdown` fires.
    pub async fn watch(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_changes().await {
                        tracing::warn!("Failed to poll {}: {}", self.path.display(), e);
                    }
                }
            }
        }
    }

    async fn update(&self, edit: impl FnOnce(&mut Configuration) + Send + 'static) -> Result<()> {
        let mut snapshot = self.feed.snapshot.lock().await;
        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || locked_update(&path, edit))
            .await
            .map_err(|e| CartwatchError::StorageError(format!("Storage write failed: {}", e)))??;
        self.feed.publish(&snapshot, &next);
        *snapshot = next;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileStore {
    async fn load(&self) -> Result<Configuration> {
        read_file(&self.path).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.update(move |c| c.enabled = enabled).await
    }

    async fn set_filter_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.update(move |c| c.filter_text = text).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.feed.tx.subscribe()
    }
}

async fn read_file(path: &Path) -> Result<Configuration> {
    decode(path, tokio::fs::read_to_string(path).await)
}

fn decode(path: &Path, read: std::io::Result<String>) -> Result<Configuration> {
    match read {
        Ok(content) if content.trim().is_empty() => Ok(Configuration::default()),
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            CartwatchError::StorageError(format!("{} is not valid: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Configuration::default()),
        Err(e) => Err(e.into()),
    }
}

/// Read, edit and write `path` while holding an exclusive lock on `<path>.lock`.
/// The lock is shared with every other process using the same file.
fn locked_update(path: &Path, edit: impl FnOnce(&mut Configuration)) -> Result<Configuration> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    lock.lock_exclusive()?;

    let mut next = decode(path, std::fs::read_to_string(path))?;
    edit(&mut next);
    write_file(path, &next)?;

    // Closing the handle releases the lock.
    drop(lock);
    Ok(next)
}

/// Write to a uniquely named temp file next to `path`, then rename over it.
fn write_file(path: &Path, config: &Configuration) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| CartwatchError::IoError(e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
