//! Directory-backed record store.
//!
//! Every record is one file in the store root, named by the record id. The
//! filesystem is the only source of truth; nothing is cached in memory.

use crate::codec::{self, MAX_HEADER_SIZE, encode_header};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::Stream;
use pasta_core::id::{generate_id, generate_token, is_valid_id};
use pasta_core::record::{Record, unix_now};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

/// Stream of payload bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Attempts at creating a file under a freshly generated id before giving up.
const MAX_INSERT_ATTEMPTS: usize = 16;

/// Outcome of one expiration sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Ids of the records that were removed.
    pub removed: Vec<String>,
    /// Entries that could not be decoded or deleted and were skipped.
    pub failed: usize,
}

/// Record storage over one directory.
pub struct RecordStore {
    root: PathBuf,
    id_length: usize,
    token_length: usize,
}

impl RecordStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(
        root: impl AsRef<Path>,
        id_length: usize,
        token_length: usize,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            id_length,
            token_length,
        })
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `id`. Rejects anything that is not a
    /// plain alphanumeric id, so no id can escape the root.
    fn record_path(&self, id: &str) -> StorageResult<PathBuf> {
        if !is_valid_id(id) {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Open the file backing `id` read-only, `None` if it does not exist.
    async fn open_file(&self, id: &str) -> StorageResult<Option<File>> {
        let path = self.record_path(id)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        let path = self.record_path(id)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    /// Draw random ids until one is not taken.
    pub async fn allocate_id(&self) -> StorageResult<String> {
        loop {
            let id = generate_id(self.id_length);
            if !self.exists(&id).await? {
                return Ok(id);
            }
        }
    }

    /// Create the file for a new record and write its header.
    ///
    /// Assigns an id and a token if the record has none. The returned
    /// writer appends payload bytes after the header. An explicit id that
    /// is already taken fails with [`StorageError::AlreadyExists`]. A header
    /// the decoder would refuse fails with [`StorageError::HeaderTooLarge`]
    /// before any file is created.
    #[instrument(skip(self, record), fields(backend = "filesystem"))]
    pub async fn insert(&self, record: &mut Record) -> StorageResult<RecordWriter> {
        if record.token.is_empty() {
            record.token = generate_token(self.token_length);
        }
        let header = encode_header(record);
        if header.len() as u64 > MAX_HEADER_SIZE {
            return Err(StorageError::HeaderTooLarge {
                size: header.len() as u64,
                limit: MAX_HEADER_SIZE,
            });
        }

        let generated = record.id.is_empty();
        let mut attempts = 0;
        let (path, file) = loop {
            if generated {
                record.id = self.allocate_id().await?;
            }
            let path = self.record_path(&record.id)?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if !generated || attempts >= MAX_INSERT_ATTEMPTS {
                        return Err(StorageError::AlreadyExists(record.id.clone()));
                    }
                    tracing::debug!(id = %record.id, "id taken concurrently, drawing another");
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        };

        let mut writer = RecordWriter {
            file,
            path,
            id: record.id.clone(),
            bytes_written: 0,
        };
        if let Err(e) = writer.file.write_all(&header).await {
            let _ = writer.abort().await;
            return Err(StorageError::Io(e));
        }
        Ok(writer)
    }

    /// Look up a record's metadata. `Ok(None)` means the record does not
    /// exist; errors are reserved for records that exist but cannot be read.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn get(&self, id: &str) -> StorageResult<Option<Record>> {
        let Some(file) = self.open_file(id).await? else {
            return Ok(None);
        };
        let (record, _) = codec::locate_body(file, id).await?;
        Ok(Some(record))
    }

    /// Open a record for reading, positioned at the first payload byte.
    ///
    /// On Unix an open reader keeps access to the full payload even if the
    /// record is deleted while it is being read: deletion unlinks the file
    /// and the data stays readable until the last handle is closed.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn open_reader(&self, id: &str) -> StorageResult<Option<(Record, File)>> {
        let Some(file) = self.open_file(id).await? else {
            return Ok(None);
        };
        codec::locate_body(file, id).await.map(Some)
    }

    /// Open a record and stream its payload in chunks.
    pub async fn get_stream(&self, id: &str) -> StorageResult<Option<(Record, ByteStream)>> {
        let Some((record, file)) = self.open_reader(id).await? else {
            return Ok(None);
        };

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Some((record, Box::pin(stream))))
    }

    /// Open an existing record for rewriting its payload.
    ///
    /// The payload is truncated and the writer is positioned right after
    /// the header; the header itself is left untouched.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn open_writer(&self, id: &str) -> StorageResult<Option<RecordWriter>> {
        let path = self.record_path(id)?;
        let file = match OpenOptions::new().read(true).write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let file_len = file.metadata().await?.len();
        let (record, file) = codec::locate_body(file, id).await?;
        file.set_len(file_len - record.size).await?;

        Ok(Some(RecordWriter {
            file,
            path,
            id: id.to_string(),
            bytes_written: 0,
        }))
    }

    /// Remove a record. Removing a record that does not exist succeeds.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Delete every record whose expiry has passed.
    ///
    /// Entries that are not records (other file names, empty files) are
    /// ignored. A record that cannot be decoded is logged and skipped, the
    /// rest of the directory is still swept.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    pub async fn sweep_expired(&self) -> StorageResult<SweepReport> {
        let now = unix_now();
        let mut report = SweepReport::default();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().filter(|n| is_valid_id(n)) else {
                continue;
            };

            match self.sweep_one(id, now).await {
                Ok(true) => report.removed.push(id.to_string()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id, error = %e, "skipping unreadable record during sweep");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn sweep_one(&self, id: &str, now: i64) -> StorageResult<bool> {
        let Some(file) = self.open_file(id).await? else {
            return Ok(false);
        };
        if file.metadata().await?.len() == 0 {
            return Ok(false);
        }
        let (record, file) = codec::locate_body(file, id).await?;
        drop(file);

        if !record.is_expired_at(now) {
            return Ok(false);
        }
        self.delete(id).await?;
        Ok(true)
    }
}

/// Appends payload bytes to a record created by [`RecordStore::insert`] or
/// opened by [`RecordStore::open_writer`].
pub struct RecordWriter {
    file: File,
    path: PathBuf,
    id: String,
    bytes_written: u64,
}

impl RecordWriter {
    /// Id of the record being written.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush the payload to disk and return its length.
    pub async fn finish(mut self) -> StorageResult<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.bytes_written)
    }

    /// Drop the record being written.
    pub async fn abort(self) -> StorageResult<()> {
        drop(self.file);
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::collections::HashSet;
    use tempfile::tempdir;

    async fn put(store: &RecordStore, record: &mut Record, body: &'static [u8]) {
        let mut writer = store.insert(record).await.unwrap();
        writer.write(Bytes::from_static(body)).await.unwrap();
        writer.finish().await.unwrap();
    }

    async fn read_body(store: &RecordStore, id: &str) -> Vec<u8> {
        let (_, mut file) = store.open_reader(id).await.unwrap().unwrap();
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_token() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record::new();
        put(&store, &mut record, b"hello").await;

        assert_eq!(record.id.len(), 8);
        assert_eq!(record.token.len(), 16);
        assert!(store.exists(&record.id).await.unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.token, record.token);
        assert_eq!(stored.size, 5);
        assert_eq!(read_body(&store, &record.id).await, b"hello");
    }

    #[tokio::test]
    async fn test_insert_writes_header_layout() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record {
            id: "fixedid1".to_string(),
            token: "tttttttttttttttt".to_string(),
            expire_at: Some(4_000_000_000),
            mime: Some("text/plain".to_string()),
            ..Record::default()
        };
        put(&store, &mut record, b"data").await;

        let raw = tokio::fs::read(dir.path().join("fixedid1")).await.unwrap();
        assert_eq!(
            raw,
            b"token:tttttttttttttttt\nexpire:4000000000\nmime:text/plain\n---\ndata"
        );
    }

    #[tokio::test]
    async fn test_insert_explicit_id_conflict() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut first = Record {
            id: "taken123".to_string(),
            ..Record::default()
        };
        put(&store, &mut first, b"one").await;

        let mut second = Record {
            id: "taken123".to_string(),
            ..Record::default()
        };
        let err = store.insert(&mut second).await.err().unwrap();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(read_body(&store, "taken123").await, b"one");
    }

    #[tokio::test]
    async fn test_insert_rejects_oversized_header() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record {
            filename: Some("a".repeat(70 * 1024)),
            ..Record::default()
        };
        let err = store.insert(&mut record).await.err().unwrap();
        assert!(matches!(err, StorageError::HeaderTooLarge { .. }));

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_never_repeat_while_records_exist() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 1, 16).await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..62 {
            let mut record = Record::new();
            put(&store, &mut record, b"x").await;
            assert!(seen.insert(record.id));
        }
        assert_eq!(seen.len(), 62);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        assert!(store.get("nothere1").await.unwrap().is_none());
        assert!(store.open_reader("nothere1").await.unwrap().is_none());
        assert!(!store.exists("nothere1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        for id in ["", "../etc", "a.b", "with space", "public.index"] {
            assert!(matches!(
                store.get(id).await,
                Err(StorageError::InvalidId(_))
            ));
            assert!(matches!(
                store.delete(id).await,
                Err(StorageError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_get_corrupt_record_is_error() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();
        tokio::fs::write(dir.path().join("corrupt1"), b"token:abc\nno terminator")
            .await
            .unwrap();

        assert!(matches!(
            store.get("corrupt1").await,
            Err(StorageError::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record::new();
        put(&store, &mut record, b"bye").await;

        store.delete(&record.id).await.unwrap();
        assert!(!store.exists(&record.id).await.unwrap());
        store.delete(&record.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_removes_partial_record() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record::new();
        let mut writer = store.insert(&mut record).await.unwrap();
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        assert_eq!(writer.bytes_written(), 7);
        writer.abort().await.unwrap();

        assert!(!store.exists(&record.id).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reader_survives_delete() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record::new();
        put(&store, &mut record, b"still readable").await;

        let (_, mut file) = store.open_reader(&record.id).await.unwrap().unwrap();
        store.delete(&record.id).await.unwrap();

        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"still readable");
    }

    #[tokio::test]
    async fn test_get_stream_yields_payload() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record::new();
        let payload = vec![7u8; STREAM_CHUNK_SIZE * 2 + 10];
        let mut writer = store.insert(&mut record).await.unwrap();
        writer.write(Bytes::from(payload.clone())).await.unwrap();
        writer.finish().await.unwrap();

        let (meta, stream) = store.get_stream(&record.id).await.unwrap().unwrap();
        assert_eq!(meta.size, payload.len() as u64);
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn test_open_writer_replaces_payload() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        let mut record = Record {
            filename: Some("a.txt".to_string()),
            ..Record::default()
        };
        put(&store, &mut record, b"original payload").await;

        let mut writer = store.open_writer(&record.id).await.unwrap().unwrap();
        writer.write(Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 3);

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.filename.as_deref(), Some("a.txt"));
        assert_eq!(stored.size, 3);
        assert_eq!(read_body(&store, &record.id).await, b"new");
        assert!(store.open_writer("missing1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();
        let now = unix_now();

        let mut expired = Record::new();
        expired.expire_at = Some(now - 10);
        put(&store, &mut expired, b"old").await;

        let mut fresh = Record::new().with_ttl(3600, now);
        put(&store, &mut fresh, b"new").await;

        let mut forever = Record::new();
        put(&store, &mut forever, b"keep").await;

        let report = store.sweep_expired().await.unwrap();
        assert_eq!(report.removed, vec![expired.id.clone()]);
        assert_eq!(report.failed, 0);
        assert!(!store.exists(&expired.id).await.unwrap());
        assert!(store.exists(&fresh.id).await.unwrap());
        assert!(store.exists(&forever.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_skips_corrupt_and_foreign_entries() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path(), 8, 16).await.unwrap();

        tokio::fs::write(dir.path().join("corrupt1"), b"garbage")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("emptyrec"), b"").await.unwrap();
        tokio::fs::write(dir.path().join("public.index"), b"abc\n")
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let mut expired = Record::new();
        expired.expire_at = Some(unix_now() - 1);
        put(&store, &mut expired, b"old").await;

        let report = store.sweep_expired().await.unwrap();
        assert_eq!(report.removed, vec![expired.id]);
        assert_eq!(report.failed, 1);
        assert!(dir.path().join("corrupt1").exists());
        assert!(dir.path().join("public.index").exists());
    }
}
