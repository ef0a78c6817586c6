//! Review Store - durable, verifiable, queryable set of review records
//!
//! The store is an append-only log of records plus a derived in-memory index
//! (package -> record ids, in insertion order). Records are never edited; the
//! only thing that grows for an existing record is the set of origins it was
//! received from, which is itself a grow-only set.
//!
//! Concurrency:
//! - `put` serializes the check-id/append/index sequence behind one writer lock
//!   and runs in its own task, so a cancelled caller never leaves a half-written
//!   record behind.
//! - Readers take a [`StoreSnapshot`], which is immutable and unaffected by
//!   imports that commit after it was taken.

pub mod log;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{PutError, StoreError};
use crate::package::PackageIdentity;
use crate::review::ReviewRecord;
use self::log::{LogEntry, LogWriter};

/// Where the store learned about a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Authored on this machine
    Local,
    /// Imported from a peer repository
    Peer(String),
}

/// Result of a successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was new and is now durable
    Inserted,
    /// The id was already present; content is unchanged
    Duplicate,
}

/// A record together with everything the store knows about its provenance
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: Arc<ReviewRecord>,
    pub origins: BTreeSet<RecordOrigin>,
    /// Insertion sequence number, 0-based
    pub seq: u64,
}

#[derive(Debug, Default, Clone)]
struct Index {
    records: HashMap<String, StoredRecord>,
    by_package: HashMap<PackageIdentity, Vec<String>>,
}

impl Index {
    fn insert(&mut self, record: ReviewRecord, origin: RecordOrigin) {
        let seq = self.records.len() as u64;
        let id = record.id.clone();
        self.by_package
            .entry(record.package.clone())
            .or_default()
            .push(id.clone());
        self.records.insert(
            id,
            StoredRecord {
                record: Arc::new(record),
                origins: BTreeSet::from([origin]),
                seq,
            },
        );
    }

    fn add_origin(&mut self, id: &str, origin: RecordOrigin) -> bool {
        match self.records.get_mut(id) {
            Some(stored) => stored.origins.insert(origin),
            None => false,
        }
    }
}

struct StoreInner {
    log_path: PathBuf,
    writer: Mutex<LogWriter>,
    index: RwLock<Index>,
}

/// Handle to the local review store. Cheap to clone.
#[derive(Clone)]
pub struct ReviewStore {
    inner: Arc<StoreInner>,
}

impl ReviewStore {
    /// Open (or create) the store in `dir`, replaying and re-verifying the log
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        let log_path = dir.join("log.jsonl");
        info!("Opening review store at {}", log_path.display());

        let mut index = Index::default();
        for (line, entry) in self::log::replay(&log_path)? {
            let corrupt = |reason: String| StoreError::Corrupt {
                path: log_path.clone(),
                line,
                reason,
            };
            match entry {
                LogEntry::Record { record, origin } => {
                    record.verify().map_err(|e| corrupt(e.to_string()))?;
                    if index.records.contains_key(&record.id) {
                        index.add_origin(&record.id, origin);
                    } else {
                        index.insert(record, origin);
                    }
                }
                LogEntry::Origin { id, origin } => {
                    if !index.records.contains_key(&id) {
                        return Err(corrupt(format!("origin entry for unknown record {id}")));
                    }
                    index.add_origin(&id, origin);
                }
            }
        }
        debug!("Review store holds {} records", index.records.len());

        let writer = LogWriter::open(&log_path).await?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                log_path,
                writer: Mutex::new(writer),
                index: RwLock::new(index),
            }),
        })
    }

    /// Path of the backing log
    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// Verify and append a record
    ///
    /// Importing an id that is already present is a no-op apart from merging
    /// the origin. The write runs in its own task: once started it either
    /// fully commits or fails, even if the caller is cancelled.
    pub async fn put(
        &self,
        record: ReviewRecord,
        origin: RecordOrigin,
    ) -> Result<PutOutcome, PutError> {
        if let Err(e) = record.verify() {
            e.log_if_security_critical();
            return Err(e.into());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.commit(record, origin).await })
            .await
            .map_err(|e| StoreError::Writer(e.to_string()))?
            .map_err(PutError::from)
    }

    /// Every valid record indexed for a package, in insertion order
    pub async fn list_for(&self, package: &PackageIdentity) -> Vec<Arc<ReviewRecord>> {
        self.snapshot().await.list_for(package)
    }

    /// Fetch a single record by id
    pub async fn get(&self, id: &str) -> Option<Arc<ReviewRecord>> {
        let index = self.inner.index.read().await;
        index.records.get(id).map(|s| Arc::clone(&s.record))
    }

    /// Number of distinct records
    pub async fn len(&self) -> usize {
        self.inner.index.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Immutable, consistent view for scoring and reporting
    pub async fn snapshot(&self) -> StoreSnapshot {
        let index = self.inner.index.read().await;
        StoreSnapshot {
            index: Arc::new(index.clone()),
        }
    }
}

impl StoreInner {
    async fn commit(
        &self,
        record: ReviewRecord,
        origin: RecordOrigin,
    ) -> Result<PutOutcome, StoreError> {
        // The writer lock makes check-id-then-insert atomic
        let mut writer = self.writer.lock().await;

        let known_origins = {
            let index = self.index.read().await;
            index.records.get(&record.id).map(|s| s.origins.clone())
        };

        match known_origins {
            Some(origins) if origins.contains(&origin) => {
                debug!("Record {} already present", record.id);
                Ok(PutOutcome::Duplicate)
            }
            Some(_) => {
                debug!("Record {} already present, adding origin {:?}", record.id, origin);
                writer
                    .append(&LogEntry::Origin {
                        id: record.id.clone(),
                        origin: origin.clone(),
                    })
                    .await?;
                self.index.write().await.add_origin(&record.id, origin);
                Ok(PutOutcome::Duplicate)
            }
            None => {
                writer
                    .append(&LogEntry::Record {
                        record: record.clone(),
                        origin: origin.clone(),
                    })
                    .await?;
                debug!("Inserted record {} for {}", record.id, record.package);
                self.index.write().await.insert(record, origin);
                Ok(PutOutcome::Inserted)
            }
        }
    }
}

/// Point-in-time view of the store
#[derive(Clone)]
pub struct StoreSnapshot {
    index: Arc<Index>,
}

impl StoreSnapshot {
    /// Records for a package in insertion order
    pub fn list_for(&self, package: &PackageIdentity) -> Vec<Arc<ReviewRecord>> {
        self.entries_for(package)
            .into_iter()
            .map(|s| Arc::clone(&s.record))
            .collect()
    }

    /// Records for a package with their origins, in insertion order
    pub fn entries_for(&self, package: &PackageIdentity) -> Vec<&StoredRecord> {
        self.index
            .by_package
            .get(package)
            .map(|ids| ids.iter().filter_map(|id| self.index.records.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<&StoredRecord> {
        self.index.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.records.is_empty()
    }

    /// All records carrying the given origin, in insertion order
    pub fn records_with_origin(&self, origin: &RecordOrigin) -> Vec<Arc<ReviewRecord>> {
        let mut matching: Vec<&StoredRecord> = self
            .index
            .records
            .values()
            .filter(|s| s.origins.contains(origin))
            .collect();
        matching.sort_by_key(|s| s.seq);
        matching.into_iter().map(|s| Arc::clone(&s.record)).collect()
    }

    /// Sorted record ids - the store's content, independent of history
    pub fn record_ids(&self) -> BTreeSet<String> {
        self.index.records.keys().cloned().collect()
    }

    /// Sorted (id, origins) pairs, for comparing whole-store state
    pub fn content(&self) -> Vec<(String, BTreeSet<RecordOrigin>)> {
        let mut content: Vec<_> = self
            .index
            .records
            .iter()
            .map(|(id, s)| (id.clone(), s.origins.clone()))
            .collect();
        content.sort();
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AuthorKey;
    use crate::review::ReviewPayload;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(key: &AuthorKey, name: &str, rating: f64) -> ReviewRecord {
        ReviewRecord::create(
            key,
            PackageIdentity::new("npm", name, "1.0.0"),
            ReviewPayload {
                comment: String::new(),
                rating,
            },
            None,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let r = record(&key, "left-pad", 1.0);

        let first = store.put(r.clone(), RecordOrigin::Local).await.unwrap();
        let second = store.put(r.clone(), RecordOrigin::Local).await.unwrap();

        assert_eq!(first, PutOutcome::Inserted);
        assert_eq!(second, PutOutcome::Duplicate);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.list_for(&r.package).await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_from_new_origin_merges_origin() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let r = record(&key, "left-pad", 1.0);

        store
            .put(r.clone(), RecordOrigin::Peer("https://a.example/reviews".into()))
            .await
            .unwrap();
        let outcome = store
            .put(r.clone(), RecordOrigin::Peer("https://b.example/reviews".into()))
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Duplicate);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.get(&r.id).unwrap().origins.len(), 2);
    }

    #[tokio::test]
    async fn test_tampered_record_never_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let mut r = record(&key, "left-pad", 1.0);
        r.payload.rating = -1.0;

        let result = store.put(r.clone(), RecordOrigin::Local).await;
        assert!(matches!(result, Err(PutError::Integrity(_))));
        assert!(store.list_for(&r.package).await.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_replays_log() {
        let temp_dir = TempDir::new().unwrap();
        let key = AuthorKey::generate();
        let a = record(&key, "a", 1.0);
        let b = record(&key, "b", -0.5);

        {
            let store = ReviewStore::open(temp_dir.path()).await.unwrap();
            store.put(a.clone(), RecordOrigin::Local).await.unwrap();
            store
                .put(b.clone(), RecordOrigin::Peer("p".into()))
                .await
                .unwrap();
            store.put(b.clone(), RecordOrigin::Local).await.unwrap();
        }

        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&b.id).unwrap().origins.len(), 2);
        assert_eq!(snapshot.records_with_origin(&RecordOrigin::Local).len(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_tail_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let key = AuthorKey::generate();
        let a = record(&key, "a", 1.0);

        {
            let store = ReviewStore::open(temp_dir.path()).await.unwrap();
            store.put(a.clone(), RecordOrigin::Local).await.unwrap();
        }

        // Simulate a crash halfway through the next append
        let log_path = temp_dir.path().join("log.jsonl");
        let mut bytes = std::fs::read(&log_path).unwrap();
        let committed = bytes.len();
        bytes.extend_from_slice(br#"{"entry":"record","record":{"id":"#);
        std::fs::write(&log_path, &bytes).unwrap();

        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(std::fs::metadata(&log_path).unwrap().len() as usize, committed);
    }

    #[tokio::test]
    async fn test_failed_append_does_not_corrupt_next_put() {
        let temp_dir = TempDir::new().unwrap();
        let key = AuthorKey::generate();
        let a = record(&key, "a", 1.0);
        let b = record(&key, "b", -1.0);
        let log_path = temp_dir.path().join("log.jsonl");

        {
            let store = ReviewStore::open(temp_dir.path()).await.unwrap();
            store.put(a.clone(), RecordOrigin::Local).await.unwrap();

            // Leftover of an append that failed partway, e.g. on a full disk
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .unwrap();
            std::io::Write::write_all(&mut file, br#"{"entry":"record","rec"#).unwrap();
            drop(file);

            store.put(b.clone(), RecordOrigin::Local).await.unwrap();
        }

        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(store.get(&a.id).await.is_some());
        assert!(store.get(&b.id).await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_committed_line_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("log.jsonl"), "not json\n").unwrap();

        let result = ReviewStore::open(temp_dir.path()).await;
        assert!(matches!(result, Err(StoreError::Corrupt { line: 1, .. })));
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_puts() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let a = record(&key, "a", 1.0);

        let before = store.snapshot().await;
        store.put(a.clone(), RecordOrigin::Local).await.unwrap();
        let after = store.snapshot().await;

        assert!(!before.contains(&a.id));
        assert!(after.contains(&a.id));
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_same_record_insert_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let r = record(&key, "race", 0.5);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let r = r.clone();
                tokio::spawn(async move { store.put(r, RecordOrigin::Local).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == PutOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);

        drop(store);
        let reopened = ReviewStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let lines = std::fs::read_to_string(temp_dir.path().join("log.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }
}
