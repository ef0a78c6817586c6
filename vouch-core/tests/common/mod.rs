//! Shared helpers for vouch-core integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Once;
use vouch_core::keys::AuthorKey;
use vouch_core::review::ReviewPayload;
use vouch_core::sync::layout;
use vouch_core::{PackageIdentity, ReviewRecord};

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn d3() -> PackageIdentity {
    PackageIdentity::new("npm", "d3", "4.10.0")
}

/// A signed review created at a fixed time plus `minute` minutes
pub fn review(key: &AuthorKey, package: PackageIdentity, rating: f64, minute: u32) -> ReviewRecord {
    ReviewRecord::create(
        key,
        package,
        ReviewPayload {
            comment: format!("rated {rating}"),
            rating,
        },
        None,
        Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap(),
    )
    .unwrap()
}

/// Place a record in a peer directory at its layout path
pub fn write_peer_record(root: &Path, record: &ReviewRecord) {
    let path = root.join(layout::record_path(record));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(record).unwrap()).unwrap();
}
