//! Loaded vouch home shared by the subcommands

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::{debug, warn};
use vouch_core::aggregate::TrustAggregator;
use vouch_core::check::{CheckPolicy, ExtensionFailure};
use vouch_core::config::VouchConfig;
use vouch_core::extension::{ExtensionClient, ExtensionRegistry};
use vouch_core::keys::AuthorKey;
use vouch_core::package::NameCase;
use vouch_core::paths::VouchPaths;
use vouch_core::store::ReviewStore;
use vouch_core::sync::{DirectoryRepository, GitRepository, OutgoingRepository, PeerRegistry};
use vouch_core::{PackageIdentity, PublishError};

pub struct Workspace {
    pub paths: VouchPaths,
    pub config: VouchConfig,
}

impl Workspace {
    /// Open an initialized home; fails with setup instructions otherwise
    pub fn open(home: Option<PathBuf>) -> Result<Self> {
        let paths = VouchPaths::discover(home)?;
        if !paths.is_initialized() {
            bail!(
                "Vouch is not set up at {}.\n\nTo set it up, run:\n  vouch setup [repo-url]",
                paths.root.display()
            );
        }
        let config = VouchConfig::load_from_path(&paths.config_file)?;
        Ok(Self { paths, config })
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save_to_path(&self.paths.config_file)
    }

    pub fn author_key_path(&self) -> PathBuf {
        self.config
            .core
            .author_key_file
            .clone()
            .unwrap_or_else(|| self.paths.author_key_file.clone())
    }

    pub fn author_key(&self) -> Result<AuthorKey> {
        let path = self.author_key_path();
        if !path.exists() {
            bail!(
                "No author key at {}.\n\nTo create one, run:\n  vouch setup",
                path.display()
            );
        }
        AuthorKey::load(&path)
    }

    /// Public key of this machine's author, if one exists
    pub fn local_author(&self) -> Option<String> {
        match self.author_key() {
            Ok(key) => Some(key.public_hex()),
            Err(e) => {
                debug!("No local author key: {:#}", e);
                None
            }
        }
    }

    pub async fn open_store(&self) -> Result<ReviewStore> {
        let dir = &self.paths.store_dir;
        ReviewStore::open(dir)
            .await
            .with_context(|| format!("Failed to open review store at {}", dir.display()))
    }

    pub fn peers(&self) -> Result<PeerRegistry> {
        PeerRegistry::load_from_path(&self.paths.peers_file)
    }

    pub fn save_peers(&self, peers: &PeerRegistry) -> Result<()> {
        peers.save_to_path(&self.paths.peers_file)
    }

    pub fn aggregator(&self, peers: &PeerRegistry) -> TrustAggregator {
        TrustAggregator::new(&peers.peers, self.local_author())
    }

    pub fn check_policy(&self) -> CheckPolicy {
        CheckPolicy {
            thresholds: self.config.check.thresholds,
            fail_on: self.config.check.fail_on,
        }
    }

    /// Start every configured extension
    ///
    /// An extension that fails to start is reported and left out; the others
    /// still run.
    pub async fn start_extensions(&self) -> (ExtensionRegistry, Vec<ExtensionFailure>) {
        let mut registry = ExtensionRegistry::new();
        let mut failures = Vec::new();
        for extension in &self.config.extensions {
            if let Err(e) = registry
                .register(extension.command(), extension.timeout())
                .await
            {
                warn!("Extension '{}' unavailable: {}", extension.name, e);
                failures.push(ExtensionFailure {
                    ecosystem: extension.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        (registry, failures)
    }

    /// Start only the extension owning `ecosystem`
    pub async fn start_extension(&self, ecosystem: &str) -> Option<ExtensionClient> {
        let extension = self.config.extension(ecosystem)?;
        match ExtensionClient::start(extension.command(), extension.timeout()).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Extension '{}' unavailable: {}", ecosystem, e);
                None
            }
        }
    }

    /// Canonical identity, using the ecosystem's name case when its extension runs
    pub fn identity(
        ecosystem: &str,
        name: &str,
        version: &str,
        extension: Option<&ExtensionClient>,
    ) -> Result<PackageIdentity> {
        let name_case = match extension {
            Some(client) => client.descriptor().name_case,
            None => {
                warn!(
                    "No extension for '{}', package name is used as typed",
                    ecosystem
                );
                NameCase::Preserve
            }
        };
        PackageIdentity::normalized(ecosystem, name, version, name_case)
            .map_err(|reason| anyhow::anyhow!("Invalid package identity: {reason}"))
    }

    /// The user's outgoing repository, as created by `vouch setup`
    pub fn outgoing_repository(&self) -> Result<Box<dyn OutgoingRepository>, PublishError> {
        let dir = self.paths.repository_dir.clone();
        if dir.join(".git").exists() {
            Ok(Box::new(GitRepository::new(dir, self.config.sync.git_timeout())))
        } else if dir.is_dir() {
            Ok(Box::new(DirectoryRepository::new(dir)))
        } else {
            Err(PublishError::NotConfigured)
        }
    }
}
