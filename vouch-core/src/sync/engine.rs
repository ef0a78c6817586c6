//! Peer Sync Engine
//!
//! Import is set union over content-addressed records, so fetching is
//! idempotent and order-independent. The only per-peer state is the
//! watermark, which moves after a batch has been fully committed.

use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::layout;
use super::peers::{PeerDescriptor, PeerRegistry};
use super::repository::{OutgoingRepository, PushOutcome};
use super::transport::{PeerTransport, RemoteFile};
use crate::error::{PublishError, PutError, SyncError};
use crate::review::ReviewRecord;
use crate::store::{PutOutcome, RecordOrigin, ReviewStore};

/// Outcome of fetching one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerSyncReport {
    pub url: String,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Watermark after the fetch
    pub watermark: Option<String>,
}

/// Outcome of publishing local records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Record files newly written into the repository
    pub written: usize,
    pub attempts: u32,
    pub pushed: bool,
    /// Records that could not be written; the rest were still published
    pub stage_failures: Vec<StageFailure>,
}

/// A local record left out of a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub id: String,
    pub reason: String,
}

pub struct SyncEngine {
    store: ReviewStore,
    peers: Mutex<PeerRegistry>,
    peers_file: PathBuf,
    transport: Arc<dyn PeerTransport>,
}

impl SyncEngine {
    pub fn new(
        store: ReviewStore,
        peers: PeerRegistry,
        peers_file: PathBuf,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            store,
            peers: Mutex::new(peers),
            peers_file,
            transport,
        }
    }

    /// Current peer list, including advanced watermarks
    pub async fn peers(&self) -> Vec<PeerDescriptor> {
        self.peers.lock().await.peers.clone()
    }

    /// Fetch and import everything new from one peer
    pub async fn fetch(&self, url: &str) -> Result<PeerSyncReport, SyncError> {
        let watermark = {
            let peers = self.peers.lock().await;
            let peer = peers.get(url).ok_or_else(|| SyncError::Unreachable {
                url: url.to_string(),
                reason: "peer is not configured".to_string(),
            })?;
            peer.watermark.clone()
        };

        let batch = self.transport.fetch_since(url, watermark.as_deref()).await?;
        debug!(
            "Peer {} offered {} candidate file(s) at {:?}",
            url,
            batch.files.len(),
            batch.marker
        );

        let mut report = PeerSyncReport {
            url: url.to_string(),
            watermark: watermark.clone(),
            ..Default::default()
        };
        let origin = RecordOrigin::Peer(url.to_string());

        for file in batch.files {
            let record = match parse_candidate(&file) {
                Ok(record) => record,
                Err(reason) => {
                    warn!("Dropping {} from {}: {}", file.path.display(), url, reason);
                    report.rejected += 1;
                    continue;
                }
            };

            match self.store.put(record, origin.clone()).await {
                Ok(PutOutcome::Inserted) => report.inserted += 1,
                Ok(PutOutcome::Duplicate) => report.duplicates += 1,
                Err(PutError::Integrity(e)) => {
                    warn!("Dropping {} from {}: {}", file.path.display(), url, e);
                    report.rejected += 1;
                }
                Err(PutError::Store(source)) => {
                    return Err(SyncError::Store {
                        url: url.to_string(),
                        source,
                    })
                }
            }
        }

        // Every put above is durable; only now may the cursor move
        if let Some(marker) = batch.marker {
            if watermark.as_deref() != Some(marker.as_str()) {
                self.commit_watermark(url, marker.clone()).await?;
            }
            report.watermark = Some(marker);
        }

        info!(
            "Synced {}: {} new, {} known, {} rejected",
            url, report.inserted, report.duplicates, report.rejected
        );
        Ok(report)
    }

    /// Fetch every configured peer concurrently; results in peer order
    pub async fn fetch_all(&self) -> Vec<(String, Result<PeerSyncReport, SyncError>)> {
        let urls: Vec<String> = self.peers().await.into_iter().map(|p| p.url).collect();
        let results = join_all(urls.iter().map(|url| self.fetch(url))).await;

        urls.into_iter()
            .zip(results)
            .inspect(|(url, result)| {
                if let Err(e) = result {
                    warn!("Skipping peer {}: {}", url, e);
                }
            })
            .collect()
    }

    async fn commit_watermark(&self, url: &str, marker: String) -> Result<(), SyncError> {
        let mut peers = self.peers.lock().await;
        if !peers.set_watermark(url, marker) {
            debug!("Peer {} removed during sync, not recording watermark", url);
            return Ok(());
        }
        peers
            .save_to_path(&self.peers_file)
            .map_err(|e| SyncError::Watermark {
                url: url.to_string(),
                reason: format!("{e:#}"),
            })
    }

    /// Write local records missing from `repo`, then commit and push
    ///
    /// A rejected push is retried after a refresh, up to `retries` times.
    pub async fn publish(
        &self,
        repo: &dyn OutgoingRepository,
        retries: u32,
    ) -> Result<PublishReport, PublishError> {
        let snapshot = self.store.snapshot().await;
        let local = snapshot.records_with_origin(&RecordOrigin::Local);

        let mut written = 0;
        let mut stage_failures = Vec::new();
        for record in &local {
            let path = repo.root().join(layout::record_path(record));
            if path.exists() {
                continue;
            }
            match stage_record(&path, record) {
                Ok(()) => written += 1,
                Err(e) => {
                    let reason = format!("{:#}", anyhow::Error::from(e));
                    warn!("Not publishing record {}: {}", record.id, reason);
                    // A half-written file would look published next time
                    let _ = std::fs::remove_file(&path);
                    stage_failures.push(StageFailure {
                        id: record.id.clone(),
                        reason,
                    });
                }
            }
        }
        debug!("Staged {} new record file(s) of {}", written, local.len());

        let message = format!("Add {written} review(s)");
        let mut attempts = 0;
        loop {
            attempts += 1;
            match repo.commit_and_push(&message).await? {
                PushOutcome::Pushed => {
                    info!("Published {} review(s)", written);
                    return Ok(PublishReport {
                        written,
                        attempts,
                        pushed: true,
                        stage_failures,
                    });
                }
                PushOutcome::LocalOnly => {
                    info!("Committed {} review(s); no remote configured", written);
                    return Ok(PublishReport {
                        written,
                        attempts,
                        pushed: false,
                        stage_failures,
                    });
                }
                PushOutcome::Rejected(reason) => {
                    if attempts > retries {
                        return Err(PublishError::Rejected { attempts, reason });
                    }
                    warn!("Push rejected (attempt {}), refreshing: {}", attempts, reason);
                    repo.refresh().await?;
                }
            }
        }
    }
}

fn parse_candidate(file: &RemoteFile) -> Result<ReviewRecord, String> {
    let record: ReviewRecord =
        serde_json::from_slice(&file.contents).map_err(|e| format!("not a review record: {e}"))?;
    layout::check_record_location(&file.path, &record)?;
    Ok(record)
}

fn stage_record(path: &std::path::Path, record: &ReviewRecord) -> Result<(), PublishError> {
    let stage_err = |source| PublishError::Stage {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(stage_err)?;
    }
    let mut body = serde_json::to_vec_pretty(record).map_err(|e| stage_err(e.into()))?;
    body.push(b'\n');
    std::fs::write(path, body).map_err(stage_err)
}
