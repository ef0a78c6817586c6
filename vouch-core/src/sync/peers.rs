//! Peer list (`<home>/peers.yml`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::paths::write_atomic;

fn default_trust_weight() -> f64 {
    1.0
}

/// A followed peer repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub url: String,

    /// Remote position of the last fully imported batch
    #[serde(default)]
    pub watermark: Option<String>,

    /// Influence of this peer's records in [0, 1]
    #[serde(default = "default_trust_weight")]
    pub trust_weight: f64,
}

impl PeerDescriptor {
    pub fn new(url: impl Into<String>, trust_weight: f64) -> Self {
        Self {
            url: url.into(),
            watermark: None,
            trust_weight,
        }
    }
}

/// All followed peers, persisted as YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerRegistry {
    #[serde(default)]
    pub peers: Vec<PeerDescriptor>,
}

impl PeerRegistry {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read peers.yml")?;
        let registry: Self =
            serde_yaml_ng::from_str(&content).context("Failed to parse peers.yml")?;
        for peer in &registry.peers {
            validate_weight(peer.trust_weight)
                .with_context(|| format!("Invalid peer entry for {}", peer.url))?;
        }
        Ok(registry)
    }

    /// Atomic replace, so a crash never leaves a half-written peer list
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        write_atomic(path, content.as_bytes())
    }

    /// Add a peer, or update the weight of an existing one
    pub fn add(&mut self, url: &str, trust_weight: f64) -> Result<()> {
        validate_weight(trust_weight)?;
        match self.peers.iter_mut().find(|p| p.url == url) {
            Some(existing) => existing.trust_weight = trust_weight,
            None => self.peers.push(PeerDescriptor::new(url, trust_weight)),
        }
        Ok(())
    }

    /// Returns false when the peer was not present
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.url != url);
        self.peers.len() != before
    }

    pub fn get(&self, url: &str) -> Option<&PeerDescriptor> {
        self.peers.iter().find(|p| p.url == url)
    }

    /// Returns false when the peer has been removed meanwhile
    pub fn set_watermark(&mut self, url: &str, watermark: String) -> bool {
        match self.peers.iter_mut().find(|p| p.url == url) {
            Some(peer) => {
                peer.watermark = Some(watermark);
                true
            }
            None => false,
        }
    }
}

fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
        bail!("trust weight must be within [0, 1] (got {weight})");
    }
    Ok(())
}
