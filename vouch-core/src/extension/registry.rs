//! Extension Registry
//!
//! Owns the running extensions, keyed by ecosystem, and fans discovery out to
//! all of them concurrently. A failing ecosystem is reported in its own slot
//! and never affects the others.

use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::process::{ExtensionClient, ExtensionCommand, ExtensionDescriptor};
use crate::error::ExtensionError;
use crate::package::{PackageIdentity, PackageMetadata};

/// Maximum directory depth searched for manifests below a project root
pub const MANIFEST_SEARCH_DEPTH: usize = 6;

const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "vendor"];

/// Outcome of discovery for one ecosystem
#[derive(Debug)]
pub struct EcosystemDiscovery {
    pub ecosystem: String,
    pub manifests: Vec<PathBuf>,
    pub result: Result<Vec<PackageIdentity>, ExtensionError>,
}

/// Registered extensions for one session
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, ExtensionClient>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an extension, handshake and register it under its ecosystem
    pub async fn register(
        &mut self,
        command: ExtensionCommand,
        timeout: Duration,
    ) -> Result<&ExtensionDescriptor, ExtensionError> {
        let client = ExtensionClient::start(command, timeout).await?;
        let ecosystem = client.ecosystem().to_string();

        if self.extensions.contains_key(&ecosystem) {
            client.shutdown().await;
            return Err(ExtensionError::AlreadyRegistered(ecosystem));
        }

        info!("Registered extension for ecosystem '{}'", ecosystem);
        let client = self.extensions.entry(ecosystem).or_insert(client);
        Ok(client.descriptor())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ExtensionDescriptor> {
        self.extensions.values().map(|c| c.descriptor())
    }

    pub fn get(&self, ecosystem: &str) -> Option<&ExtensionDescriptor> {
        self.extensions.get(ecosystem).map(|c| c.descriptor())
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run discovery in every registered ecosystem concurrently
    ///
    /// Results come back in ecosystem order. Ecosystems with no manifest
    /// under `root` report an empty list without contacting the extension.
    pub async fn discover_all(&self, root: &Path) -> Vec<EcosystemDiscovery> {
        let calls = self.extensions.iter().map(|(ecosystem, client)| async move {
            // The walk is blocking filesystem work
            let search_root = root.to_path_buf();
            let patterns = client.descriptor().manifest_patterns.clone();
            let manifests = match tokio::task::spawn_blocking(move || {
                find_manifests(&search_root, &patterns)
            })
            .await
            {
                Ok(manifests) => manifests,
                Err(e) => {
                    warn!("Skipping ecosystem '{}': manifest search failed: {}", ecosystem, e);
                    return EcosystemDiscovery {
                        ecosystem: ecosystem.clone(),
                        manifests: Vec::new(),
                        result: Err(ExtensionError::ManifestSearch {
                            ecosystem: ecosystem.clone(),
                            reason: e.to_string(),
                        }),
                    };
                }
            };
            if manifests.is_empty() {
                debug!("No manifests for '{}' under {}", ecosystem, root.display());
                return EcosystemDiscovery {
                    ecosystem: ecosystem.clone(),
                    manifests,
                    result: Ok(Vec::new()),
                };
            }

            debug!(
                "Discovering '{}' dependencies from {} manifest(s)",
                ecosystem,
                manifests.len()
            );
            let result = client.discover(root, manifests.clone()).await;
            match &result {
                Ok(packages) => debug!("'{}' reported {} packages", ecosystem, packages.len()),
                Err(e) => warn!("Skipping ecosystem '{}': {}", ecosystem, e),
            }

            EcosystemDiscovery {
                ecosystem: ecosystem.clone(),
                manifests,
                result,
            }
        });

        join_all(calls).await
    }

    /// Route a metadata lookup to the owning extension
    pub async fn describe(
        &self,
        package: &PackageIdentity,
    ) -> Result<PackageMetadata, ExtensionError> {
        let client = self
            .extensions
            .get(&package.ecosystem)
            .ok_or_else(|| ExtensionError::NotRegistered(package.ecosystem.clone()))?;
        client.describe(package).await
    }

    /// Stop every extension process
    pub async fn shutdown(&mut self) {
        let clients = std::mem::take(&mut self.extensions);
        join_all(clients.values().map(|c| c.shutdown())).await;
        debug!("Shut down {} extension(s)", clients.len());
    }
}

/// Find manifest files matching any of `patterns`
///
/// Patterns are matched against file names. The walk skips hidden and
/// dependency directories. If nothing matches below `root`, each ancestor's
/// direct children are checked, nearest first, and the first hit wins.
pub fn find_manifests(root: &Path, patterns: &BTreeSet<String>) -> Vec<PathBuf> {
    let compiled: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();
    if compiled.is_empty() {
        return Vec::new();
    }
    let matches = |path: &Path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| compiled.iter().any(|p| p.matches(name)))
            .unwrap_or(false)
    };

    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(MANIFEST_SEARCH_DEPTH)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && matches(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    if found.is_empty() {
        for ancestor in root.ancestors().skip(1) {
            let Ok(entries) = std::fs::read_dir(ancestor) else {
                continue;
            };
            found = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && matches(p))
                .collect();
            if !found.is_empty() {
                debug!("Using manifests from ancestor {}", ancestor.display());
                break;
            }
        }
    }

    found.sort();
    found
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn patterns(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_manifests_skips_dependency_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("package.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join("web")).unwrap();
        std::fs::write(root.join("web/package.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join("node_modules/d3")).unwrap();
        std::fs::write(root.join("node_modules/d3/package.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/package.json"), "{}").unwrap();

        let found = find_manifests(root, &patterns(&["package.json"]));
        assert_eq!(
            found,
            vec![root.join("package.json"), root.join("web/package.json")]
        );
    }

    #[test]
    fn test_find_manifests_glob_patterns() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("requirements.txt"), "").unwrap();
        std::fs::write(root.join("requirements-dev.txt"), "").unwrap();
        std::fs::write(root.join("README.md"), "").unwrap();

        let found = find_manifests(root, &patterns(&["requirements*.txt"]));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_find_manifests_walks_up_to_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("project");
        let nested = project.join("src/lib");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(project.join("package.json"), "{}").unwrap();

        let found = find_manifests(&nested, &patterns(&["package.json"]));
        assert_eq!(found, vec![project.join("package.json")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_extension_does_not_abort_others() {
        use super::super::process::tests::{handshake, scripted};

        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("deps.txt"), "a\n").unwrap();

        let healthy = scripted(
            &[
                handshake("good"),
                serde_json::json!({
                    "type": "discovered",
                    "packages": [{"ecosystem": "good", "name": "a", "version": "1.0.0"}]
                }),
            ],
            "cat >/dev/null",
        );
        let broken = scripted(&[handshake("bad")], "printf 'garbage!'; cat >/dev/null");

        let mut registry = ExtensionRegistry::new();
        registry
            .register(healthy, Duration::from_secs(5))
            .await
            .unwrap();
        registry
            .register(broken, Duration::from_secs(5))
            .await
            .unwrap();

        let results = registry.discover_all(temp_dir.path()).await;
        assert_eq!(results.len(), 2);

        let bad = results.iter().find(|d| d.ecosystem == "bad").unwrap();
        assert!(bad.result.is_err());
        let good = results.iter().find(|d| d.ecosystem == "good").unwrap();
        assert_eq!(
            good.result.as_ref().unwrap(),
            &vec![PackageIdentity::new("good", "a", "1.0.0")]
        );
        assert_eq!(good.manifests, vec![temp_dir.path().join("deps.txt")]);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_extension_for_ecosystem_is_rejected() {
        use super::super::process::tests::{handshake, scripted};

        let mut registry = ExtensionRegistry::new();
        registry
            .register(
                scripted(&[handshake("toy")], "cat >/dev/null"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let result = registry
            .register(
                scripted(&[handshake("toy")], "cat >/dev/null"),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(ExtensionError::AlreadyRegistered(_))));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_describe_unknown_ecosystem() {
        let registry = ExtensionRegistry::new();
        let result = registry
            .describe(&PackageIdentity::new("cargo", "serde", "1.0.0"))
            .await;
        assert!(matches!(result, Err(ExtensionError::NotRegistered(_))));
    }
}
