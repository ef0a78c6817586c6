//! `vouch sync`: fetch every peer, then publish local reviews

use anyhow::Result;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::info;
use vouch_core::sync::{AutoTransport, GitPeerTransport, SyncEngine};
use vouch_core::{PublishError, SyncError};

use crate::review_cli::short;
use crate::workspace::Workspace;

#[derive(Tabled)]
struct PeerResultRow {
    #[tabled(rename = "Peer")]
    url: String,
    #[tabled(rename = "New")]
    inserted: usize,
    #[tabled(rename = "Known")]
    duplicates: usize,
    #[tabled(rename = "Rejected")]
    rejected: usize,
    #[tabled(rename = "Status")]
    status: String,
}

/// Returns false when publishing failed or left a review out
pub async fn sync_command(workspace: &Workspace, publish: bool) -> Result<bool> {
    let store = workspace.open_store().await?;
    let peers = workspace.peers()?;
    let transport = AutoTransport::new(GitPeerTransport::new(
        workspace.paths.peer_cache_dir.clone(),
        workspace.config.sync.git_timeout(),
    ));
    let engine = SyncEngine::new(
        store,
        peers,
        workspace.paths.peers_file.clone(),
        Arc::new(transport),
    );

    let results = engine.fetch_all().await;
    if results.is_empty() {
        println!("No peers configured; nothing to fetch.");
    } else {
        let mut rows = Vec::new();
        for (url, result) in results {
            match result {
                Ok(report) => rows.push(PeerResultRow {
                    url,
                    inserted: report.inserted,
                    duplicates: report.duplicates,
                    rejected: report.rejected,
                    status: "ok".to_string(),
                }),
                // The store itself is broken: stop instead of reporting per peer
                Err(e @ SyncError::Store { .. }) => return Err(e.into()),
                Err(e) => rows.push(PeerResultRow {
                    url,
                    inserted: 0,
                    duplicates: 0,
                    rejected: 0,
                    status: format!("skipped: {e}"),
                }),
            }
        }
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("{table}");
    }

    if !publish {
        info!("Publishing skipped (--no-publish)");
        return Ok(true);
    }

    let repository = match workspace.outgoing_repository() {
        Ok(repository) => repository,
        Err(PublishError::NotConfigured) => {
            println!("ℹ️  No review repository; local reviews were not published.");
            println!("   Create one with: vouch setup [repo-url]");
            return Ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    match engine
        .publish(repository.as_ref(), workspace.config.sync.publish_retries)
        .await
    {
        Ok(report) => {
            if report.pushed {
                println!("✅ Published {} new review(s)", report.written);
            } else {
                println!(
                    "✅ Committed {} new review(s) locally (no remote configured)",
                    report.written
                );
            }
            for failure in &report.stage_failures {
                eprintln!(
                    "⚠️  Review {} was not published: {}",
                    short(&failure.id),
                    failure.reason
                );
            }
            Ok(report.stage_failures.is_empty())
        }
        Err(e) => {
            eprintln!("❌ Publishing failed: {e}");
            eprintln!("   Fetched reviews were imported; run `vouch sync` again to retry.");
            Ok(false)
        }
    }
}
