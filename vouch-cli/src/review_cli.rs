//! Authoring reviews and reading scores

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, warn};
use vouch_core::check::Classification;
use vouch_core::extension::protocol::CAP_DESCRIBE;
use vouch_core::review::ReviewPayload;
use vouch_core::store::{PutOutcome, RecordOrigin};
use vouch_core::ReviewRecord;

use crate::workspace::Workspace;

pub struct ReviewArgs {
    pub ecosystem: String,
    pub package: String,
    pub version: String,
    pub rating: f64,
    pub comment: Option<String>,
    pub supersedes: Option<String>,
}

pub async fn review_command(workspace: &Workspace, args: ReviewArgs) -> Result<()> {
    let key = workspace.author_key()?;
    let store = workspace.open_store().await?;

    let extension = workspace.start_extension(&args.ecosystem).await;
    let identity = Workspace::identity(
        &args.ecosystem,
        &args.package,
        &args.version,
        extension.as_ref(),
    );
    let identity = match identity {
        Ok(identity) => identity,
        Err(e) => {
            if let Some(client) = &extension {
                client.shutdown().await;
            }
            return Err(e);
        }
    };

    if let Some(prior) = &args.supersedes {
        let Some(previous) = store.get(prior).await else {
            bail!("Cannot supersede {prior}: no such review in the store");
        };
        if previous.author_key != key.public_hex() {
            bail!("Cannot supersede {prior}: it was written by another author");
        }
        if previous.package != identity {
            bail!(
                "Cannot supersede {prior}: it reviews {}, not {identity}",
                previous.package
            );
        }
    }

    let record = ReviewRecord::create(
        &key,
        identity.clone(),
        ReviewPayload {
            comment: args.comment.unwrap_or_default(),
            rating: args.rating,
        },
        args.supersedes,
        Utc::now(),
    )
    .context("Invalid review")?;

    let id = record.id.clone();
    match store.put(record, RecordOrigin::Local).await? {
        PutOutcome::Inserted => println!("✅ Recorded review {} for {identity}", short(&id)),
        PutOutcome::Duplicate => println!("ℹ️  Review {} for {identity} already exists", short(&id)),
    }

    if let Some(client) = extension {
        if client.descriptor().supports(CAP_DESCRIBE) {
            match client.describe(&identity).await {
                Ok(metadata) => {
                    if let Some(url) = metadata.registry_package_version_url {
                        println!("   Registry: {url}");
                    }
                    if let Some(sha) = metadata.source_code_sha256 {
                        println!("   Source sha256: {sha}");
                    }
                }
                Err(e) => warn!("Could not describe {}: {}", identity, e),
            }
        }
        client.shutdown().await;
    }

    println!("   Publish it with: vouch sync");
    Ok(())
}

#[derive(Tabled)]
struct ReviewRow {
    #[tabled(rename = "Author")]
    author: String,
    #[tabled(rename = "Rating")]
    rating: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Comment")]
    comment: String,
}

pub async fn score_command(
    workspace: &Workspace,
    ecosystem: &str,
    package: &str,
    version: &str,
    json: bool,
    show_reviews: bool,
) -> Result<()> {
    let extension = workspace.start_extension(ecosystem).await;
    let identity = Workspace::identity(ecosystem, package, version, extension.as_ref());
    if let Some(client) = &extension {
        client.shutdown().await;
    }
    let identity = identity?;

    let store = workspace.open_store().await?;
    let peers = workspace.peers()?;
    let snapshot = store.snapshot().await;
    let aggregate = workspace.aggregator(&peers).aggregate(&snapshot, &identity);
    let classification =
        Classification::classify(&aggregate, &workspace.check_policy().thresholds);
    debug!("Scored {} from {} record(s)", identity, aggregate.total_records);

    if json {
        let output = serde_json::json!({
            "aggregate": aggregate,
            "classification": classification,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{identity}");
    match aggregate.score {
        Some(score) => println!("   Score:          {score:+.2}"),
        None => println!("   Score:          unreviewed"),
    }
    println!("   Classification: {classification}");
    println!("   Reviews:        {}", aggregate.review_count);
    println!("   Authors:        {}", aggregate.distinct_author_count);
    if aggregate.total_records != aggregate.review_count {
        println!(
            "   Records:        {} ({} superseded or duplicate)",
            aggregate.total_records,
            aggregate.total_records - aggregate.review_count
        );
    }

    if show_reviews {
        let rows: Vec<ReviewRow> = snapshot
            .list_for(&identity)
            .iter()
            .map(|record| ReviewRow {
                author: short(&record.author_key).to_string(),
                rating: format!("{:+.2}", record.payload.rating),
                created: record.created_at.to_rfc3339(),
                comment: truncate(&record.payload.comment, 50),
            })
            .collect();
        if !rows.is_empty() {
            let table = Table::new(&rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::first()).with(Alignment::center()))
                .to_string();
            println!("{table}");
        }
    }
    Ok(())
}

pub(crate) fn short(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max - 3).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_comment() {
        assert_eq!(truncate("short", 50), "short");
        assert_eq!(truncate("first line\nsecond", 50), "first line");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
