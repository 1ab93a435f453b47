//! Favorites table.
//!
//! [`FavoritesStore`] is the persistence contract; [`JsonFavoritesStore`]
//! keeps the table in one JSON file replaced atomically on every mutation.
//! Subscribers observe row presence through a `watch` channel and are
//! notified as soon as an insert or delete has been persisted.

use crate::cache::Resolution;
use crate::catalog::Image;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Store unavailable or write failure
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Favorites store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Favorites store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Favorites store task failed: {0}")]
    Task(String),
}

/// A persisted favorite: the image as it was when favorited, plus the names
/// of its three cached files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    pub image: Image,
    pub preview_file: String,
    pub webformat_file: String,
    pub large_file: String,
    pub created_at: DateTime<Utc>,
}

impl FavoriteEntry {
    pub fn new(image: Image, created_at: DateTime<Utc>) -> Self {
        Self {
            preview_file: Resolution::Preview.file_name(&image.id),
            webformat_file: Resolution::Webformat.file_name(&image.id),
            large_file: Resolution::Large.file_name(&image.id),
            image,
            created_at,
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image.id
    }

    pub fn file_name(&self, resolution: Resolution) -> &str {
        match resolution {
            Resolution::Preview => &self.preview_file,
            Resolution::Webformat => &self.webformat_file,
            Resolution::Large => &self.large_file,
        }
    }
}

type Table = BTreeMap<String, FavoriteEntry>;

/// Live view of one image id's row
pub struct FavoriteSubscription {
    image_id: String,
    rx: watch::Receiver<Arc<Table>>,
}

impl FavoriteSubscription {
    pub fn new(image_id: impl Into<String>, rx: watch::Receiver<Arc<Table>>) -> Self {
        Self {
            image_id: image_id.into(),
            rx,
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// Current row, if any
    pub fn current(&self) -> Option<FavoriteEntry> {
        self.rx.borrow().get(&self.image_id).cloned()
    }

    pub fn is_favorite(&self) -> bool {
        self.rx.borrow().contains_key(&self.image_id)
    }

    /// Wait until this id's presence flips. Returns the new value, or `None`
    /// if the store went away.
    pub async fn changed(&mut self) -> Option<bool> {
        let before = self.is_favorite();
        loop {
            self.rx.changed().await.ok()?;
            let now = self.rx.borrow_and_update().contains_key(&self.image_id);
            if now != before {
                return Some(now);
            }
        }
    }

    /// End the subscription
    pub fn unsubscribe(self) {
        tracing::trace!("Unsubscribed from favorite {}", self.image_id);
    }
}

/// Persistence contract for favorites
#[async_trait]
pub trait FavoritesStore: Send + Sync {
    /// Insert or replace the row for `entry`'s image id
    async fn insert(&self, entry: FavoriteEntry) -> Result<(), PersistenceError>;

    /// Delete the row for `entry`'s image id; absent rows are a no-op
    async fn delete(&self, entry: &FavoriteEntry) -> Result<(), PersistenceError>;

    /// All rows, newest first
    async fn list(&self) -> Result<Vec<FavoriteEntry>, PersistenceError>;

    /// Observe one id
    fn subscribe(&self, image_id: &str) -> FavoriteSubscription;
}

/// JSON-file backed [`FavoritesStore`]
pub struct JsonFavoritesStore {
    path: PathBuf,
    // Serializes writers; readers use the watch snapshot
    write_lock: Mutex<()>,
    tx: watch::Sender<Arc<Table>>,
}

impl JsonFavoritesStore {
    /// Open the table at `path`. A missing file is an empty table.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let read_path = path.clone();
        let table = run_blocking(move || read_table(&read_path)).await?;
        tracing::info!("Favorites store opened with {} entries", table.len());

        let (tx, _) = watch::channel(Arc::new(table));
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            tx,
        })
    }

    /// Apply `mutate` to a copy of the table, persist it, then publish it.
    /// Nothing is published if the write fails.
    async fn commit<F>(&self, mutate: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut Table) -> bool,
    {
        let _guard = self.write_lock.lock().await;

        let mut table = (**self.tx.borrow()).clone();
        if !mutate(&mut table) {
            return Ok(());
        }

        let path = self.path.clone();
        let content = serde_json::to_vec_pretty(&table)?;
        run_blocking(move || write_table(&path, &content)).await?;

        self.tx.send_replace(Arc::new(table));
        Ok(())
    }
}

#[async_trait]
impl FavoritesStore for JsonFavoritesStore {
    async fn insert(&self, entry: FavoriteEntry) -> Result<(), PersistenceError> {
        let id = entry.image_id().to_string();
        self.commit(|table| {
            table.insert(id.clone(), entry);
            true
        })
        .await?;
        tracing::debug!("Favorite {} saved", id);
        Ok(())
    }

    async fn delete(&self, entry: &FavoriteEntry) -> Result<(), PersistenceError> {
        let id = entry.image_id();
        self.commit(|table| table.remove(id).is_some()).await?;
        tracing::debug!("Favorite {} deleted", id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FavoriteEntry>, PersistenceError> {
        let mut entries: Vec<FavoriteEntry> = self.tx.borrow().values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    fn subscribe(&self, image_id: &str) -> FavoriteSubscription {
        FavoriteSubscription::new(image_id, self.tx.subscribe())
    }
}

fn read_table(path: &Path) -> Result<Table, PersistenceError> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Table::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Table::new()),
        Err(e) => Err(PersistenceError::Io(e)),
    }
}

/// Write-to-temp-then-rename, so the table file is always complete
fn write_table(path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        PersistenceError::Io(e)
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, PersistenceError>
where
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_image;
    use chrono::TimeZone;

    fn entry(id: &str, minute: u32) -> FavoriteEntry {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap();
        FavoriteEntry::new(sample_image(id), at)
    }

    #[test]
    fn entry_uses_id_derived_file_names() {
        let entry = entry("img42", 0);
        assert_eq!(entry.preview_file, "img42_preview.jpg");
        assert_eq!(entry.webformat_file, "img42_webformat.jpg");
        assert_eq!(entry.file_name(Resolution::Large), "img42_large.jpg");
    }

    #[tokio::test]
    async fn insert_and_delete_update_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFavoritesStore::open(dir.path().join("favorites.json"))
            .await
            .unwrap();
        let sub = store.subscribe("a");
        assert!(!sub.is_favorite());

        store.insert(entry("a", 0)).await.unwrap();
        assert!(sub.is_favorite());
        assert_eq!(sub.current().unwrap().image_id(), "a");

        store.delete(&entry("a", 0)).await.unwrap();
        assert!(!sub.is_favorite());
    }

    #[tokio::test]
    async fn insert_twice_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFavoritesStore::open(dir.path().join("favorites.json"))
            .await
            .unwrap();

        store.insert(entry("a", 0)).await.unwrap();
        store.insert(entry("a", 5)).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].created_at, entry("a", 5).created_at);
    }

    #[tokio::test]
    async fn delete_of_absent_row_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favorites.json");
        let store = JsonFavoritesStore::open(&path).await.unwrap();

        store.delete(&entry("ghost", 0)).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn subscribers_are_woken_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            JsonFavoritesStore::open(dir.path().join("favorites.json"))
                .await
                .unwrap(),
        );
        let mut sub = store.subscribe("a");

        let writer = Arc::clone(&store);
        let handle = tokio::spawn(async move {
            writer.insert(entry("b", 0)).await.unwrap();
            writer.insert(entry("a", 1)).await.unwrap();
        });

        assert_eq!(sub.changed().await, Some(true));
        handle.await.unwrap();
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn rows_survive_reopen_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("favorites.json");
        {
            let store = JsonFavoritesStore::open(&path).await.unwrap();
            store.insert(entry("old", 0)).await.unwrap();
            store.insert(entry("new", 30)).await.unwrap();
        }

        let store = JsonFavoritesStore::open(&path).await.unwrap();
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.image.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(store.subscribe("old").is_favorite());
    }

    #[tokio::test]
    async fn unavailable_storage_fails_without_publishing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFavoritesStore::open(dir.path().join("missing-dir").join("favorites.json"))
            .await
            .unwrap();
        let sub = store.subscribe("a");

        let err = store.insert(entry("a", 0)).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
        assert!(!sub.is_favorite());
    }
}
