//! Vouch home directory discovery and layout
//!
//! Everything vouch persists lives under one home directory.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "VOUCH_HOME";

/// Filesystem layout of a vouch home
#[derive(Debug, Clone)]
pub struct VouchPaths {
    /// Root of the home directory
    pub root: PathBuf,
    /// `config.yml`
    pub config_file: PathBuf,
    /// Review store directory (holds `log.jsonl`)
    pub store_dir: PathBuf,
    /// `peers.yml`
    pub peers_file: PathBuf,
    /// Author signing key
    pub author_key_file: PathBuf,
    /// Working copy of the user's own review repository
    pub repository_dir: PathBuf,
    /// Cache clones of peer repositories
    pub peer_cache_dir: PathBuf,
}

impl VouchPaths {
    /// Resolve the home directory
    ///
    /// Resolution order:
    /// 1. CLI override (if provided)
    /// 2. `VOUCH_HOME`
    /// 3. Platform-specific user config directory
    pub fn discover(cli_override: Option<PathBuf>) -> Result<Self> {
        trace!("Discovering vouch home");

        if let Some(path) = cli_override {
            debug!("Using --home override: {}", path.display());
            return Self::from_root(absolute(path)?);
        }

        if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            debug!("Using {} override", HOME_ENV);
            return Self::from_root(absolute(PathBuf::from(path))?);
        }

        let dirs = directories::ProjectDirs::from("", "", "vouch")
            .context("Could not determine platform config directory")?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Layout rooted at `root`
    pub fn from_root(root: PathBuf) -> Result<Self> {
        Ok(Self {
            config_file: root.join("config.yml"),
            store_dir: root.join("store"),
            peers_file: root.join("peers.yml"),
            author_key_file: root.join("keys").join("author.key"),
            repository_dir: root.join("repository"),
            peer_cache_dir: root.join("peers"),
            root,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.config_file.exists()
    }

    /// Create the directory structure
    pub fn initialize(&self) -> Result<()> {
        info!("Initializing vouch home at {}", self.root.display());
        for dir in [&self.root, &self.store_dir, &self.peer_cache_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        if let Some(keys) = self.author_key_file.parent() {
            std::fs::create_dir_all(keys).context("Failed to create keys directory")?;
        }
        Ok(())
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .context("Failed to read current directory")?
        .join(path))
}

/// Replace `path` with `contents` via a temp file in the same directory
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
