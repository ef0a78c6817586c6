//! Peer transports: how candidate record files are fetched from a peer
//!
//! A transport only moves bytes. Everything it returns is untrusted and goes
//! through layout and signature checks before it reaches the store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::git::{git_output, run_git};
use super::layout::{self, REVIEWS_DIR};
use crate::error::SyncError;
use crate::keys::sha256_hex;

/// One candidate file from a peer, path relative to the repository root
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Files added since a watermark plus the remote's current position
#[derive(Debug, Clone, Default)]
pub struct RemoteBatch {
    /// `None` when the remote has no history yet
    pub marker: Option<String>,
    pub files: Vec<RemoteFile>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch record files added after `watermark` (all of them when `None`)
    async fn fetch_since(
        &self,
        url: &str,
        watermark: Option<&str>,
    ) -> Result<RemoteBatch, SyncError>;
}

fn unreachable(url: &str, reason: impl std::fmt::Display) -> SyncError {
    SyncError::Unreachable {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// A peer without `reviews/` is empty; one where it is not a directory is malformed
fn check_layout(url: &str, root: &Path) -> Result<(), SyncError> {
    let reviews = root.join(REVIEWS_DIR);
    if reviews.exists() && !reviews.is_dir() {
        return Err(SyncError::MalformedRemote {
            url: url.to_string(),
            reason: format!("'{REVIEWS_DIR}' is not a directory"),
        });
    }
    Ok(())
}

/// Every layout-conforming record file under `root/reviews`, sorted
fn list_record_files(root: &Path) -> Vec<PathBuf> {
    let reviews = root.join(REVIEWS_DIR);
    let mut files: Vec<PathBuf> = WalkDir::new(&reviews)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|rel| layout::is_record_path(rel))
        .collect();
    files.sort();
    files
}

fn read_files(url: &str, root: &Path, paths: Vec<PathBuf>) -> Result<Vec<RemoteFile>, SyncError> {
    paths
        .into_iter()
        .map(|path| {
            let contents = std::fs::read(root.join(&path))
                .map_err(|e| unreachable(url, format!("cannot read {}: {e}", path.display())))?;
            Ok(RemoteFile { path, contents })
        })
        .collect()
}

/// A peer that is a plain directory following the review layout
#[derive(Debug, Clone, Default)]
pub struct DirectoryPeerTransport;

impl DirectoryPeerTransport {
    fn fetch_blocking(url: &str, watermark: Option<&str>) -> Result<RemoteBatch, SyncError> {
        let root = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if !root.is_dir() {
            return Err(unreachable(url, "not a directory"));
        }
        check_layout(url, root)?;

        let files = list_record_files(root);
        let listing: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        let marker = sha256_hex(listing.join("\n").as_bytes());

        if watermark == Some(marker.as_str()) {
            debug!("Directory peer {} unchanged", url);
            return Ok(RemoteBatch {
                marker: Some(marker),
                files: Vec::new(),
            });
        }

        Ok(RemoteBatch {
            marker: Some(marker),
            files: read_files(url, root, files)?,
        })
    }
}

#[async_trait]
impl PeerTransport for DirectoryPeerTransport {
    async fn fetch_since(
        &self,
        url: &str,
        watermark: Option<&str>,
    ) -> Result<RemoteBatch, SyncError> {
        let url_owned = url.to_string();
        let watermark = watermark.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            Self::fetch_blocking(&url_owned, watermark.as_deref())
        })
        .await
        .map_err(|e| unreachable(url, e))?
    }
}

/// A peer that is a git repository, mirrored into a local cache clone
#[derive(Debug, Clone)]
pub struct GitPeerTransport {
    cache_dir: PathBuf,
    timeout: Duration,
}

impl GitPeerTransport {
    pub fn new(cache_dir: PathBuf, timeout: Duration) -> Self {
        Self { cache_dir, timeout }
    }

    /// Cache clone location for a peer url
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = sha256_hex(url.as_bytes());
        self.cache_dir.join(&digest[..16])
    }

    async fn update_cache(&self, url: &str, cache: &Path) -> Result<(), SyncError> {
        if cache.join(".git").exists() {
            debug!("Fetching peer {} into {}", url, cache.display());
            run_git(cache, &["fetch", "--quiet", url, "HEAD"], self.timeout)
                .await
                .map_err(|e| unreachable(url, format!("{e:#}")))?;
            run_git(cache, &["reset", "--quiet", "--hard", "FETCH_HEAD"], self.timeout)
                .await
                .map_err(|e| unreachable(url, format!("{e:#}")))?;
            return Ok(());
        }

        info!("Cloning peer {}", url);
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| unreachable(url, e))?;
        let cache_str = cache.to_string_lossy().into_owned();
        run_git(
            &self.cache_dir,
            &["clone", "--quiet", url, cache_str.as_str()],
            self.timeout,
        )
        .await
        .map_err(|e| unreachable(url, format!("{e:#}")))?;
        Ok(())
    }

    async fn added_since(
        &self,
        url: &str,
        cache: &Path,
        watermark: &str,
        head: &str,
    ) -> Result<Option<Vec<PathBuf>>, SyncError> {
        let known = git_output(
            cache,
            &["cat-file", "-e", &format!("{watermark}^{{commit}}")],
            self.timeout,
        )
        .await
        .map_err(|e| unreachable(url, format!("{e:#}")))?;
        if !known.success {
            debug!("Watermark {} unknown to {}, listing everything", watermark, url);
            return Ok(None);
        }

        let diff = run_git(
            cache,
            &[
                "diff",
                "--name-only",
                "--no-renames",
                "--diff-filter=A",
                watermark,
                head,
                "--",
                REVIEWS_DIR,
            ],
            self.timeout,
        )
        .await
        .map_err(|e| unreachable(url, format!("{e:#}")))?;

        let mut paths: Vec<PathBuf> = diff
            .lines()
            .map(PathBuf::from)
            .filter(|p| layout::is_record_path(p))
            .collect();
        paths.sort();
        Ok(Some(paths))
    }
}

#[async_trait]
impl PeerTransport for GitPeerTransport {
    async fn fetch_since(
        &self,
        url: &str,
        watermark: Option<&str>,
    ) -> Result<RemoteBatch, SyncError> {
        let cache = self.cache_path(url);
        self.update_cache(url, &cache).await?;
        check_layout(url, &cache)?;

        let head = git_output(&cache, &["rev-parse", "--verify", "HEAD"], self.timeout)
            .await
            .map_err(|e| unreachable(url, format!("{e:#}")))?;
        if !head.success {
            debug!("Peer {} has no commits yet", url);
            return Ok(RemoteBatch::default());
        }
        let head = head.stdout;

        if watermark == Some(head.as_str()) {
            return Ok(RemoteBatch {
                marker: Some(head),
                files: Vec::new(),
            });
        }

        let paths = match watermark {
            Some(w) => self.added_since(url, &cache, w, &head).await?,
            None => None,
        };
        let paths = match paths {
            Some(paths) => paths,
            None => {
                let cache = cache.clone();
                tokio::task::spawn_blocking(move || list_record_files(&cache))
                    .await
                    .map_err(|e| unreachable(url, e))?
            }
        };

        let url_owned = url.to_string();
        let files = tokio::task::spawn_blocking(move || read_files(&url_owned, &cache, paths))
            .await
            .map_err(|e| unreachable(url, e))??;

        Ok(RemoteBatch {
            marker: Some(head),
            files,
        })
    }
}

/// Picks the directory transport for local non-git directories, git otherwise
pub struct AutoTransport {
    directory: DirectoryPeerTransport,
    git: GitPeerTransport,
}

impl AutoTransport {
    pub fn new(git: GitPeerTransport) -> Self {
        Self {
            directory: DirectoryPeerTransport,
            git,
        }
    }
}

#[async_trait]
impl PeerTransport for AutoTransport {
    async fn fetch_since(
        &self,
        url: &str,
        watermark: Option<&str>,
    ) -> Result<RemoteBatch, SyncError> {
        let local = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if local.is_dir() && !local.join(".git").exists() {
            self.directory.fetch_since(url, watermark).await
        } else {
            self.git.fetch_since(url, watermark).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const ID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn put_file(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "{}").unwrap();
    }

    #[tokio::test]
    async fn test_directory_marker_tracks_listing() {
        let temp_dir = TempDir::new().unwrap();
        let url = temp_dir.path().to_string_lossy().to_string();
        put_file(temp_dir.path(), &format!("reviews/npm/d3/4.10.0/{ID_A}.json"));
        put_file(temp_dir.path(), "reviews/npm/d3/4.10.0/README.md");

        let transport = DirectoryPeerTransport;
        let first = transport.fetch_since(&url, None).await.unwrap();
        assert_eq!(first.files.len(), 1);

        let again = transport
            .fetch_since(&url, first.marker.as_deref())
            .await
            .unwrap();
        assert!(again.files.is_empty());
        assert_eq!(again.marker, first.marker);

        put_file(temp_dir.path(), &format!("reviews/npm/d3/4.10.0/{ID_B}.json"));
        let changed = transport
            .fetch_since(&url, first.marker.as_deref())
            .await
            .unwrap();
        assert_ne!(changed.marker, first.marker);
        assert_eq!(changed.files.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_unreachable() {
        let result = DirectoryPeerTransport
            .fetch_since("/nonexistent/vouch/peer", None)
            .await;
        assert!(matches!(result, Err(SyncError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_reviews_file_is_malformed() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(REVIEWS_DIR), "not a directory").unwrap();
        let url = temp_dir.path().to_string_lossy().to_string();

        let result = DirectoryPeerTransport.fetch_since(&url, None).await;
        assert!(matches!(result, Err(SyncError::MalformedRemote { .. })));
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    async fn git(dir: &Path, args: &[&str]) {
        let mut full = vec!["-c", "user.name=Test", "-c", "user.email=test@example.com"];
        full.extend_from_slice(args);
        run_git(dir, &full, Duration::from_secs(30)).await.unwrap();
    }

    #[tokio::test]
    async fn test_moved_record_is_fetched_again() {
        if !git_available() {
            return;
        }
        let peer = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let url = peer.path().to_string_lossy().to_string();
        let old_path = format!("reviews/npm/d3/4.10.0/{ID_A}.json");
        let new_path = format!("reviews/npm/d3/4.10.1/{ID_A}.json");

        git(peer.path(), &["init", "--quiet"]).await;
        put_file(peer.path(), &old_path);
        git(peer.path(), &["add", "."]).await;
        git(peer.path(), &["commit", "--quiet", "-m", "first"]).await;

        let transport = GitPeerTransport::new(cache.path().to_path_buf(), Duration::from_secs(30));
        let first = transport.fetch_since(&url, None).await.unwrap();
        assert_eq!(first.files.len(), 1);

        std::fs::create_dir_all(peer.path().join("reviews/npm/d3/4.10.1")).unwrap();
        git(peer.path(), &["mv", &old_path, &new_path]).await;
        git(peer.path(), &["commit", "--quiet", "-m", "move"]).await;

        let second = transport
            .fetch_since(&url, first.marker.as_deref())
            .await
            .unwrap();
        let paths: Vec<PathBuf> = second.files.into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec![PathBuf::from(new_path)]);
    }

    #[test]
    fn test_cache_path_is_stable_per_url() {
        let transport = GitPeerTransport::new(PathBuf::from("/cache"), Duration::from_secs(5));
        let a = transport.cache_path("https://a.example/r.git");
        assert_eq!(a, transport.cache_path("https://a.example/r.git"));
        assert_ne!(a, transport.cache_path("https://b.example/r.git"));
        assert_eq!(a.file_name().unwrap().len(), 16);
    }
}
