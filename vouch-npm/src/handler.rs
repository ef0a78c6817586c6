//! The npm [`ExtensionHandler`]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vouch_core::extension::ExtensionHandler;
use vouch_core::package::{NameCase, PackageMetadata};
use vouch_core::PackageIdentity;

use crate::manifest::{self, PACKAGE_JSON, PACKAGE_LOCK};
use crate::registry::{self, RegistryClient, REGISTRY_HOST};

pub const ECOSYSTEM: &str = "npm";

pub struct NpmExtension {
    /// `None` in offline mode: describe reports website URLs only
    registry: Option<RegistryClient>,
}

impl NpmExtension {
    pub fn new(registry: Option<RegistryClient>) -> Self {
        Self { registry }
    }

    pub fn offline() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ExtensionHandler for NpmExtension {
    fn ecosystem_id(&self) -> &str {
        ECOSYSTEM
    }

    fn manifest_patterns(&self) -> Vec<String> {
        vec![PACKAGE_JSON.to_string(), PACKAGE_LOCK.to_string()]
    }

    fn name_case(&self) -> NameCase {
        NameCase::Lowercase
    }

    async fn discover(
        &self,
        root: &Path,
        manifests: &[PathBuf],
    ) -> anyhow::Result<Vec<PackageIdentity>> {
        debug!(
            "Reading {} manifest(s) under {}",
            manifests.len(),
            root.display()
        );
        let manifests = manifests.to_vec();
        let dependencies =
            tokio::task::spawn_blocking(move || manifest::collect_dependencies(&manifests))
                .await??;

        // Lowercasing can merge names, so dedupe after it
        let packages: BTreeSet<PackageIdentity> = dependencies
            .into_iter()
            .map(|(name, version)| PackageIdentity::new(ECOSYSTEM, name.to_lowercase(), version))
            .collect();
        Ok(packages.into_iter().collect())
    }

    async fn describe(&self, package: &PackageIdentity) -> anyhow::Result<PackageMetadata> {
        let mut metadata = PackageMetadata {
            registry_host_name: Some(REGISTRY_HOST.to_string()),
            registry_package_url: Some(registry::package_url(&package.name)),
            registry_package_version_url: Some(registry::package_version_url(
                &package.name,
                &package.version,
            )),
            ..Default::default()
        };

        let Some(client) = &self.registry else {
            return Ok(metadata);
        };
        // Archive details are best effort; the website URLs stand on their own
        match client
            .source_archive(&package.name, &package.version)
            .await
        {
            Ok(Some(archive)) => {
                metadata.source_code_url = Some(archive.url);
                metadata.source_code_sha256 = Some(archive.sha256);
            }
            Ok(None) => debug!("Registry has no archive for {}", package),
            Err(e) => warn!("Registry lookup for {} failed: {:#}", package, e),
        }
        Ok(metadata)
    }
}
