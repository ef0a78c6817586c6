//! Trust Aggregator
//!
//! Folds the verified records for one package into a single score. Only chain
//! tips count, each author counts once, and peer-imported opinions are
//! discounted by the peer's configured trust weight. The computation works on
//! the id-sorted record set, so it cannot depend on insertion order.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::package::PackageIdentity;
use crate::review::{RATING_MAX, RATING_MIN};
use crate::store::{RecordOrigin, StoreSnapshot, StoredRecord};
use crate::sync::PeerDescriptor;

/// Derived trust signal for one package. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustAggregate {
    pub package: PackageIdentity,
    /// `None` means unreviewed, which is not the same as a neutral 0.0
    pub score: Option<f64>,
    pub review_count: usize,
    pub distinct_author_count: usize,
    pub low_confidence: bool,
    /// Valid records indexed before tip filtering and author dedup
    pub total_records: usize,
}

impl TrustAggregate {
    pub fn is_unreviewed(&self) -> bool {
        self.score.is_none()
    }
}

/// Scores packages against a store snapshot
#[derive(Debug, Clone, Default)]
pub struct TrustAggregator {
    peer_weights: HashMap<String, f64>,
    local_author: Option<String>,
}

impl TrustAggregator {
    /// `local_author` is the hex key of this machine's author, always weighted 1.0
    pub fn new<'a>(
        peers: impl IntoIterator<Item = &'a PeerDescriptor>,
        local_author: Option<String>,
    ) -> Self {
        Self {
            peer_weights: peers
                .into_iter()
                .map(|p| (p.url.clone(), p.trust_weight.clamp(0.0, 1.0)))
                .collect(),
            local_author,
        }
    }

    pub fn aggregate(&self, snapshot: &StoreSnapshot, package: &PackageIdentity) -> TrustAggregate {
        let mut entries = snapshot.entries_for(package);
        let total_records = entries.len();
        entries.sort_by(|a, b| a.record.id.cmp(&b.record.id));

        // Latest tip per author; ties go to the larger id
        let mut by_author: BTreeMap<&str, &StoredRecord> = BTreeMap::new();
        for entry in chain_tips(&entries) {
            let record = &entry.record;
            by_author
                .entry(record.author_key.as_str())
                .and_modify(|current| {
                    let newer = (record.created_at, &record.id)
                        > (current.record.created_at, &current.record.id);
                    if newer {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }

        let distinct_author_count = by_author.len();
        let score = if distinct_author_count == 0 {
            None
        } else {
            let sum: f64 = by_author
                .values()
                .map(|entry| entry.record.payload.rating * self.weight(entry))
                .sum();
            Some((sum / distinct_author_count as f64).clamp(RATING_MIN, RATING_MAX))
        };

        TrustAggregate {
            package: package.clone(),
            score,
            review_count: by_author.len(),
            distinct_author_count,
            low_confidence: distinct_author_count == 1,
            total_records,
        }
    }

    /// Influence of one record: 1.0 for our own, else the best peer it came from
    fn weight(&self, entry: &StoredRecord) -> f64 {
        if entry.origins.contains(&RecordOrigin::Local)
            || self.local_author.as_deref() == Some(entry.record.author_key.as_str())
        {
            return 1.0;
        }

        entry
            .origins
            .iter()
            .filter_map(|origin| match origin {
                RecordOrigin::Peer(url) => Some(self.peer_weights.get(url).copied().unwrap_or(0.0)),
                RecordOrigin::Local => None,
            })
            .fold(0.0, f64::max)
    }
}

/// Records that no other record by the same author supersedes
///
/// `entries` must all belong to one package.
pub fn chain_tips<'a>(entries: &[&'a StoredRecord]) -> Vec<&'a StoredRecord> {
    let authors: HashMap<&str, &str> = entries
        .iter()
        .map(|e| (e.record.id.as_str(), e.record.author_key.as_str()))
        .collect();

    let superseded: HashSet<&str> = entries
        .iter()
        .filter_map(|e| {
            let prior = e.record.supersedes.as_deref()?;
            // Supersession across authors is ignored
            (authors.get(prior) == Some(&e.record.author_key.as_str())).then_some(prior)
        })
        .collect();

    entries
        .iter()
        .filter(|e| !superseded.contains(e.record.id.as_str()))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AuthorKey;
    use crate::review::{ReviewPayload, ReviewRecord};
    use crate::store::ReviewStore;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn d3() -> PackageIdentity {
        PackageIdentity::new("npm", "d3", "4.10.0")
    }

    fn review(key: &AuthorKey, rating: f64, minute: u32, supersedes: Option<&str>) -> ReviewRecord {
        ReviewRecord::create(
            key,
            d3(),
            ReviewPayload {
                comment: String::new(),
                rating,
            },
            supersedes.map(str::to_string),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_superseded_record_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();

        let first = review(&key, -1.0, 0, None);
        let amended = review(&key, 0.5, 1, Some(&first.id));
        store.put(first, RecordOrigin::Local).await.unwrap();
        store.put(amended, RecordOrigin::Local).await.unwrap();

        let aggregate = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.score, Some(0.5));
        assert_eq!(aggregate.total_records, 2);
        assert_eq!(aggregate.review_count, 1);
        assert!(aggregate.low_confidence);
    }

    #[tokio::test]
    async fn test_cross_author_supersession_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let victim = AuthorKey::generate();
        let attacker = AuthorKey::generate();

        let honest = review(&victim, 1.0, 0, None);
        let hostile = review(&attacker, 1.0, 1, Some(&honest.id));
        store.put(honest, RecordOrigin::Local).await.unwrap();
        store.put(hostile, RecordOrigin::Local).await.unwrap();

        let aggregate = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.distinct_author_count, 2);
    }

    #[tokio::test]
    async fn test_latest_record_per_author_wins() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();

        // Two unlinked records; the later one counts
        store
            .put(review(&key, 1.0, 5, None), RecordOrigin::Local)
            .await
            .unwrap();
        store
            .put(review(&key, -1.0, 0, None), RecordOrigin::Local)
            .await
            .unwrap();

        let aggregate = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.score, Some(1.0));
        assert_eq!(aggregate.distinct_author_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_peer_contributes_zero_weight() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let local = AuthorKey::generate();
        let stranger = AuthorKey::generate();

        store
            .put(review(&local, 1.0, 0, None), RecordOrigin::Local)
            .await
            .unwrap();
        store
            .put(
                review(&stranger, 1.0, 0, None),
                RecordOrigin::Peer("https://gone.example/r.git".into()),
            )
            .await
            .unwrap();

        let aggregator = TrustAggregator::new(std::iter::empty(), Some(local.public_hex()));
        let aggregate = aggregator.aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.score, Some(0.5));
        assert_eq!(aggregate.distinct_author_count, 2);
    }

    #[tokio::test]
    async fn test_best_peer_weight_applies() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let author = AuthorKey::generate();
        let record = review(&author, 1.0, 0, None);

        store
            .put(record.clone(), RecordOrigin::Peer("a".into()))
            .await
            .unwrap();
        store
            .put(record, RecordOrigin::Peer("b".into()))
            .await
            .unwrap();

        let peers = [
            PeerDescriptor::new("a", 0.25),
            PeerDescriptor::new("b", 0.75),
        ];
        let aggregate = TrustAggregator::new(&peers, None).aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.score, Some(0.75));
    }

    #[tokio::test]
    async fn test_tie_on_created_at_prefers_larger_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let key = AuthorKey::generate();
        let a = review(&key, 1.0, 0, None);
        let b = review(&key, -1.0, 0, None);
        let expected = if a.id > b.id { 1.0 } else { -1.0 };

        store.put(a, RecordOrigin::Local).await.unwrap();
        store.put(b, RecordOrigin::Local).await.unwrap();

        let aggregate = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
        assert_eq!(aggregate.score, Some(expected));
    }
}
