//! `vouch check`: score every dependency of a project

use anyhow::{bail, Context, Result};
use std::path::Path;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::warn;
use vouch_core::check::{CheckReport, Classification, Orchestrator};

use crate::workspace::Workspace;

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Reviews")]
    reviews: usize,
    #[tabled(rename = "Authors")]
    authors: usize,
    #[tabled(rename = "Verdict")]
    classification: String,
}

/// Returns false when the report violates the configured policy
pub async fn check_command(workspace: &Workspace, path: &Path, json: bool) -> Result<bool> {
    if !path.is_dir() {
        bail!("Project directory does not exist: {}", path.display());
    }
    let root = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;

    let store = workspace.open_store().await?;
    let peers = workspace.peers()?;
    let aggregator = workspace.aggregator(&peers);

    let (mut registry, mut failures) = workspace.start_extensions().await;
    if registry.is_empty() && failures.is_empty() {
        warn!("No extensions registered; add one with `vouch extension add`");
    }

    let snapshot = store.snapshot().await;
    let mut report = Orchestrator::new(&registry, &aggregator, workspace.check_policy())
        .check(&root, &snapshot)
        .await;
    registry.shutdown().await;
    failures.append(&mut report.extension_failures);
    report.extension_failures = failures;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(!report.failed)
}

fn print_report(report: &CheckReport) {
    if report.entries.is_empty() {
        println!("No dependencies found.");
    } else {
        let rows: Vec<CheckRow> = report
            .entries
            .iter()
            .map(|(package, entry)| CheckRow {
                package: package.to_string(),
                score: entry
                    .aggregate
                    .score
                    .map(|s| format!("{s:+.2}"))
                    .unwrap_or_else(|| "-".to_string()),
                reviews: entry.aggregate.review_count,
                authors: entry.aggregate.distinct_author_count,
                classification: entry.classification.to_string(),
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("{table}");
    }

    println!(
        "{} trusted, {} low confidence, {} unreviewed, {} caution",
        report.count(Classification::Trusted),
        report.count(Classification::LowConfidence),
        report.count(Classification::Unreviewed),
        report.count(Classification::Caution),
    );

    for failure in &report.extension_failures {
        println!("⚠️  Skipped ecosystem '{}': {}", failure.ecosystem, failure.reason);
    }

    if report.failed {
        println!("❌ Check failed: worst verdict is {}", worst_label(report));
    } else {
        println!("✅ Check passed");
    }
}

fn worst_label(report: &CheckReport) -> String {
    report
        .worst
        .map(|w| w.to_string())
        .unwrap_or_else(|| "none".to_string())
}
