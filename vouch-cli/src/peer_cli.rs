//! Peer management: add, list, remove

use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::workspace::Workspace;

#[derive(Parser, Debug)]
pub enum PeerCommand {
    /// Follow a peer's review repository
    Add {
        /// Git URL or local directory of the peer's repository
        url: String,

        /// How much this peer's reviews count, between 0.0 and 1.0
        #[clap(long, default_value_t = 1.0)]
        weight: f64,
    },

    /// List followed peers
    List,

    /// Stop following a peer
    Remove {
        /// URL as shown by `vouch peer list`
        url: String,
    },
}

impl PeerCommand {
    pub async fn execute(self, home: Option<PathBuf>) -> Result<()> {
        let workspace = Workspace::open(home)?;
        match self {
            PeerCommand::Add { url, weight } => peer_add(&workspace, &url, weight),
            PeerCommand::List => peer_list(&workspace),
            PeerCommand::Remove { url } => peer_remove(&workspace, &url),
        }
    }
}

/// Local directories are stored absolute so sync works from any cwd
fn canonical_url(url: &str) -> String {
    let path = Path::new(url);
    if path.is_dir() {
        if let Ok(absolute) = path.canonicalize() {
            return absolute.to_string_lossy().into_owned();
        }
    }
    url.to_string()
}

fn peer_add(workspace: &Workspace, url: &str, weight: f64) -> Result<()> {
    let url = canonical_url(url);
    let mut peers = workspace.peers()?;
    let existed = peers.get(&url).is_some();
    peers.add(&url, weight)?;
    workspace.save_peers(&peers)?;

    if existed {
        println!("✅ Updated peer {url} (weight {weight})");
    } else {
        println!("✅ Added peer {url} (weight {weight})");
        println!("   Fetch its reviews with: vouch sync");
    }
    Ok(())
}

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Synced at")]
    watermark: String,
}

fn peer_list(workspace: &Workspace) -> Result<()> {
    let peers = workspace.peers()?;
    if peers.peers.is_empty() {
        println!("No peers configured.");
        println!("   Add one with: vouch peer add <url>");
        return Ok(());
    }

    let rows: Vec<PeerRow> = peers
        .peers
        .iter()
        .map(|peer| PeerRow {
            url: peer.url.clone(),
            weight: format!("{:.2}", peer.trust_weight),
            watermark: peer
                .watermark
                .as_deref()
                .map(|w| w.chars().take(12).collect())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

fn peer_remove(workspace: &Workspace, url: &str) -> Result<()> {
    let mut peers = workspace.peers()?;
    let url = if peers.get(url).is_some() {
        url.to_string()
    } else {
        canonical_url(url)
    };
    if !peers.remove(&url) {
        bail!("Not following peer '{url}'");
    }
    workspace.save_peers(&peers)?;
    println!("✅ Removed peer {url}");
    println!("   Reviews already imported from it no longer count toward scores");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_canonical_url_keeps_remote_urls() {
        assert_eq!(
            canonical_url("https://example.com/reviews.git"),
            "https://example.com/reviews.git"
        );
    }

    #[test]
    fn test_canonical_url_absolutizes_directories() {
        let dir = TempDir::new().unwrap();
        let url = canonical_url(&dir.path().to_string_lossy());
        assert!(Path::new(&url).is_absolute());
        assert_eq!(
            PathBuf::from(&url),
            dir.path().canonicalize().unwrap()
        );
    }
}
