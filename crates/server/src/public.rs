//! Bounded listing of public records.
//!
//! Ids are kept newest first, capped at `public.max_entries`, and persisted
//! to an index file inside the storage directory (one id per line, in
//! display order). Entries are pointers only: a listed id may have been
//! deleted since, so readers resolve them against the store.

use pasta_core::is_valid_id;
use pasta_storage::{RecordStore, StorageResult};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Name of the index file in the storage directory.
pub const INDEX_FILE: &str = "public.index";

pub struct PublicListing {
    max_entries: usize,
    path: PathBuf,
    ids: Mutex<VecDeque<String>>,
}

impl PublicListing {
    /// Empty listing persisted under `root`. `max_entries == 0` disables it.
    pub fn new(root: impl AsRef<Path>, max_entries: usize) -> Self {
        Self {
            max_entries,
            path: root.as_ref().join(INDEX_FILE),
            ids: Mutex::new(VecDeque::new()),
        }
    }

    /// Restore the listing from the index file.
    ///
    /// Ids that no longer resolve to a live record are dropped, and the list
    /// is cut to `max_entries` if the file held more.
    pub async fn load(store: &RecordStore, max_entries: usize) -> StorageResult<Self> {
        let listing = Self::new(store.root(), max_entries);
        if !listing.is_enabled() {
            return Ok(listing);
        }

        let text = match fs::read_to_string(&listing.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(e.into()),
        };

        let mut kept = VecDeque::new();
        let mut total = 0usize;
        for id in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            total += 1;
            if kept.len() >= max_entries || kept.contains(&id.to_string()) || !is_valid_id(id) {
                continue;
            }
            match store.get(id).await {
                Ok(Some(record)) if !record.is_expired() => kept.push_back(id.to_string()),
                Ok(_) => {}
                Err(e) => tracing::warn!(id, error = %e, "dropping unreadable public entry"),
            }
        }

        if kept.len() != total {
            tracing::info!(
                kept = kept.len(),
                dropped = total - kept.len(),
                "pruned public listing"
            );
            listing.persist(&kept).await?;
        }
        *listing.ids.lock().await = kept;
        Ok(listing)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Put `id` at the top of the listing, dropping the oldest entries
    /// beyond the limit.
    pub async fn add(&self, id: &str) -> StorageResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut ids = self.ids.lock().await;
        ids.retain(|existing| existing != id);
        ids.push_front(id.to_string());
        ids.truncate(self.max_entries);
        self.persist(&ids).await
    }

    /// Remove `id`. Returns whether it was listed.
    pub async fn remove(&self, id: &str) -> StorageResult<bool> {
        Ok(self.remove_many(&[id.to_string()]).await? > 0)
    }

    /// Remove every id in `gone`. Returns how many were listed.
    pub async fn remove_many(&self, gone: &[String]) -> StorageResult<usize> {
        if !self.is_enabled() || gone.is_empty() {
            return Ok(0);
        }
        let mut ids = self.ids.lock().await;
        let before = ids.len();
        ids.retain(|existing| !gone.contains(existing));
        let removed = before - ids.len();
        if removed > 0 {
            self.persist(&ids).await?;
        }
        Ok(removed)
    }

    /// Listed ids, newest first.
    pub async fn entries(&self) -> Vec<String> {
        self.ids.lock().await.iter().cloned().collect()
    }

    /// Rewrite the index file. Callers hold the list lock.
    async fn persist(&self, ids: &VecDeque<String>) -> StorageResult<()> {
        let mut contents = String::with_capacity(ids.len() * 9);
        for id in ids {
            contents.push_str(id);
            contents.push('\n');
        }

        let temp_path = self
            .path
            .with_file_name(format!("{INDEX_FILE}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(contents.as_bytes()).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
