//! Dependency Check Orchestrator
//!
//! Discover -> dedup -> aggregate against one snapshot -> classify -> report.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::aggregate::{TrustAggregate, TrustAggregator};
use crate::extension::ExtensionRegistry;
use crate::package::PackageIdentity;
use crate::store::StoreSnapshot;

fn default_trusted() -> f64 {
    0.5
}

fn default_min_distinct_authors() -> usize {
    2
}

/// Score cutoffs for classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Lowest score still classified as trusted
    #[serde(default = "default_trusted")]
    pub trusted: f64,
    /// Fewer distinct authors than this is low confidence
    #[serde(default = "default_min_distinct_authors")]
    pub min_distinct_authors: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trusted: default_trusted(),
            min_distinct_authors: default_min_distinct_authors(),
        }
    }
}

/// Per-package verdict, declared in increasing severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Trusted,
    LowConfidence,
    Unreviewed,
    Caution,
}

impl Classification {
    pub fn classify(aggregate: &TrustAggregate, thresholds: &Thresholds) -> Self {
        match aggregate.score {
            None => Self::Unreviewed,
            Some(_) if aggregate.distinct_author_count < thresholds.min_distinct_authors => {
                Self::LowConfidence
            }
            Some(score) if score < thresholds.trusted => Self::Caution,
            Some(_) => Self::Trusted,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trusted => "trusted",
            Self::LowConfidence => "low-confidence",
            Self::Unreviewed => "unreviewed",
            Self::Caution => "caution",
        };
        f.write_str(label)
    }
}

/// Least severe classification that fails a check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailOn {
    Never,
    Caution,
    #[default]
    Unreviewed,
    LowConfidence,
}

impl FailOn {
    fn threshold(self) -> Option<Classification> {
        match self {
            Self::Never => None,
            Self::Caution => Some(Classification::Caution),
            Self::Unreviewed => Some(Classification::Unreviewed),
            Self::LowConfidence => Some(Classification::LowConfidence),
        }
    }

    pub fn fails(self, worst: Classification) -> bool {
        self.threshold().is_some_and(|limit| worst >= limit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckPolicy {
    pub thresholds: Thresholds,
    pub fail_on: FailOn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckEntry {
    pub aggregate: TrustAggregate,
    pub classification: Classification,
}

/// An ecosystem whose extension failed during discovery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionFailure {
    pub ecosystem: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    /// Ordered by package identity; serialized as a list
    #[serde(serialize_with = "entries_as_list")]
    pub entries: BTreeMap<PackageIdentity, CheckEntry>,
    pub extension_failures: Vec<ExtensionFailure>,
    /// Most severe classification, `None` when no packages were found
    pub worst: Option<Classification>,
    pub failed: bool,
}

impl CheckReport {
    /// Classify already-discovered packages
    pub fn build(
        packages: impl IntoIterator<Item = PackageIdentity>,
        extension_failures: Vec<ExtensionFailure>,
        snapshot: &StoreSnapshot,
        aggregator: &TrustAggregator,
        policy: &CheckPolicy,
    ) -> Self {
        let entries: BTreeMap<PackageIdentity, CheckEntry> = packages
            .into_iter()
            .map(|package| {
                let aggregate = aggregator.aggregate(snapshot, &package);
                let classification = Classification::classify(&aggregate, &policy.thresholds);
                (
                    package,
                    CheckEntry {
                        aggregate,
                        classification,
                    },
                )
            })
            .collect();

        let worst = entries.values().map(|e| e.classification).max();
        let failed = worst.is_some_and(|w| policy.fail_on.fails(w));

        Self {
            entries,
            extension_failures,
            worst,
            failed,
        }
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.entries
            .values()
            .filter(|e| e.classification == classification)
            .count()
    }
}

fn entries_as_list<S: Serializer>(
    entries: &BTreeMap<PackageIdentity, CheckEntry>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(entries.values())
}

/// Runs a dependency check for a project directory
pub struct Orchestrator<'a> {
    registry: &'a ExtensionRegistry,
    aggregator: &'a TrustAggregator,
    policy: CheckPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        registry: &'a ExtensionRegistry,
        aggregator: &'a TrustAggregator,
        policy: CheckPolicy,
    ) -> Self {
        Self {
            registry,
            aggregator,
            policy,
        }
    }

    pub async fn check(&self, root: &Path, snapshot: &StoreSnapshot) -> CheckReport {
        let mut packages = Vec::new();
        let mut failures = Vec::new();

        for discovery in self.registry.discover_all(root).await {
            match discovery.result {
                Ok(found) => packages.extend(found),
                Err(e) => {
                    warn!("Ecosystem '{}' skipped: {}", discovery.ecosystem, e);
                    failures.push(ExtensionFailure {
                        ecosystem: discovery.ecosystem,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = CheckReport::build(packages, failures, snapshot, self.aggregator, &self.policy);
        info!(
            "Checked {} packages under {}: worst={}",
            report.entries.len(),
            root.display(),
            report
                .worst
                .map(|w| w.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        report
    }
}
