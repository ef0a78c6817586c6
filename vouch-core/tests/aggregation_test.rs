//! Trust aggregation over a real store

mod common;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vouch_core::aggregate::TrustAggregator;
use vouch_core::keys::AuthorKey;
use vouch_core::store::{RecordOrigin, ReviewStore};
use vouch_core::sync::PeerDescriptor;
use vouch_core::ReviewRecord;

use common::{d3, init_test_logging, review};

const TRUSTED_PEER: &str = "https://alice.example/reviews.git";
const HALF_PEER: &str = "https://carol.example/reviews.git";

fn peers() -> Vec<PeerDescriptor> {
    vec![
        PeerDescriptor::new(TRUSTED_PEER, 1.0),
        PeerDescriptor::new(HALF_PEER, 0.5),
    ]
}

#[tokio::test]
async fn test_d3_worked_example() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let store = ReviewStore::open(temp_dir.path()).await.unwrap();
    let me = AuthorKey::generate();
    let alice = AuthorKey::generate();
    let carol = AuthorKey::generate();

    store
        .put(review(&me, d3(), 1.0, 0), RecordOrigin::Local)
        .await
        .unwrap();
    store
        .put(
            review(&alice, d3(), 1.0, 1),
            RecordOrigin::Peer(TRUSTED_PEER.to_string()),
        )
        .await
        .unwrap();
    store
        .put(
            review(&carol, d3(), -1.0, 2),
            RecordOrigin::Peer(HALF_PEER.to_string()),
        )
        .await
        .unwrap();

    let aggregator = TrustAggregator::new(&peers(), Some(me.public_hex()));
    let aggregate = aggregator.aggregate(&store.snapshot().await, &d3());

    let score = aggregate.score.unwrap();
    assert!((score - 0.5).abs() < 1e-9, "score was {score}");
    assert_eq!(aggregate.review_count, 3);
    assert_eq!(aggregate.distinct_author_count, 3);
    assert!(!aggregate.low_confidence);
}

#[tokio::test]
async fn test_unreviewed_is_distinct_from_zero() {
    let temp_dir = TempDir::new().unwrap();
    let store = ReviewStore::open(temp_dir.path()).await.unwrap();
    let a = AuthorKey::generate();
    let b = AuthorKey::generate();

    let aggregator = TrustAggregator::default();
    let empty = aggregator.aggregate(&store.snapshot().await, &d3());
    assert_eq!(empty.score, None);
    assert!(empty.is_unreviewed());

    store
        .put(review(&a, d3(), 1.0, 0), RecordOrigin::Local)
        .await
        .unwrap();
    store
        .put(review(&b, d3(), -1.0, 0), RecordOrigin::Local)
        .await
        .unwrap();
    let neutral = aggregator.aggregate(&store.snapshot().await, &d3());
    assert_eq!(neutral.score, Some(0.0));
    assert!(!neutral.is_unreviewed());
}

#[tokio::test]
async fn test_sybil_records_from_one_author_count_once() {
    let one_author = TempDir::new().unwrap();
    let store = ReviewStore::open(one_author.path()).await.unwrap();
    let key = AuthorKey::generate();

    store
        .put(review(&key, d3(), 1.0, 0), RecordOrigin::Local)
        .await
        .unwrap();
    let single = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());

    for minute in 1..5 {
        store
            .put(review(&key, d3(), 1.0, minute), RecordOrigin::Local)
            .await
            .unwrap();
    }
    let spammed = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
    assert_eq!(spammed.distinct_author_count, single.distinct_author_count);
    assert_eq!(spammed.distinct_author_count, 1);
    assert_eq!(spammed.total_records, 5);

    let many_authors = TempDir::new().unwrap();
    let store = ReviewStore::open(many_authors.path()).await.unwrap();
    for minute in 0..5 {
        store
            .put(review(&AuthorKey::generate(), d3(), 1.0, minute), RecordOrigin::Local)
            .await
            .unwrap();
    }
    let crowd = TrustAggregator::default().aggregate(&store.snapshot().await, &d3());
    assert_eq!(crowd.distinct_author_count, 5);
}

#[tokio::test]
async fn test_aggregation_ignores_insertion_order() {
    let keys: Vec<AuthorKey> = (0..4).map(|_| AuthorKey::generate()).collect();
    let mut records: Vec<(ReviewRecord, RecordOrigin)> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let origin = if i % 2 == 0 {
                RecordOrigin::Peer(HALF_PEER.to_string())
            } else {
                RecordOrigin::Peer(TRUSTED_PEER.to_string())
            };
            (review(key, d3(), 0.25 * i as f64 - 0.5, i as u32), origin)
        })
        .collect();
    // Same author, same timestamp: tie broken by id
    records.push((review(&keys[0], d3(), 0.9, 0), RecordOrigin::Peer(HALF_PEER.to_string())));

    let aggregator = TrustAggregator::new(&peers(), None);
    let mut results = Vec::new();
    for rotation in 0..records.len() {
        let temp_dir = TempDir::new().unwrap();
        let store = ReviewStore::open(temp_dir.path()).await.unwrap();
        let mut ordered = records.clone();
        ordered.rotate_left(rotation);
        if rotation % 2 == 1 {
            ordered.reverse();
        }
        for (record, origin) in ordered {
            store.put(record, origin).await.unwrap();
        }
        results.push(aggregator.aggregate(&store.snapshot().await, &d3()));
    }

    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
}
