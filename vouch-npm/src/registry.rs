//! npm registry lookups for `describe`

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Host name reported in package metadata
pub const REGISTRY_HOST: &str = "npmjs.com";

/// Public registry API
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.com";

const WEBSITE_PACKAGE_URL: &str = "https://www.npmjs.com/package";

/// Human-facing page for a package
pub fn package_url(name: &str) -> String {
    format!("{WEBSITE_PACKAGE_URL}/{name}/")
}

/// Human-facing page for one version of a package
pub fn package_version_url(name: &str, version: &str) -> String {
    format!("{WEBSITE_PACKAGE_URL}/{name}/v/{version}")
}

/// Where a published version's source archive lives, and its digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArchive {
    pub url: String,
    pub sha256: String,
}

/// Client for the registry's package documents
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vouch-extension-npm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Registry document URL; scoped names keep their `@` but escape the slash
    pub fn document_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.replace('/', "%2f"))
    }

    /// Locate and hash the tarball of `name@version`
    ///
    /// Returns `None` when the registry does not know the version.
    pub async fn source_archive(&self, name: &str, version: &str) -> Result<Option<SourceArchive>> {
        let url = self.document_url(name);
        debug!("Fetching registry document {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query {url}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Registry returned HTTP {} for {}", response.status(), url);
        }

        let document: serde_json::Value = response
            .json()
            .await
            .context("Registry document is not valid JSON")?;
        let Some(tarball) = tarball_url(&document, version) else {
            return Ok(None);
        };

        let sha256 = self.download_sha256(&tarball).await?;
        info!("Hashed {}@{} source archive", name, version);
        Ok(Some(SourceArchive {
            url: tarball,
            sha256,
        }))
    }

    /// SHA-256 of the archive at `url`
    ///
    /// The registry only publishes sha1 and sha512 digests, so the archive
    /// is downloaded and hashed here.
    async fn download_sha256(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to download source archive")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed: HTTP {} for {}", response.status(), url);
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read download response")?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// `versions[<version>].dist.tarball` of a registry document
pub fn tarball_url(document: &serde_json::Value, version: &str) -> Option<String> {
    document
        .get("versions")?
        .get(version)?
        .get("dist")?
        .get("tarball")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_website_urls() {
        assert_eq!(package_url("d3"), "https://www.npmjs.com/package/d3/");
        assert_eq!(
            package_version_url("d3", "4.10.0"),
            "https://www.npmjs.com/package/d3/v/4.10.0"
        );
    }

    #[test]
    fn test_document_url_escapes_scoped_names() {
        let client = RegistryClient::new("https://registry.example/").unwrap();
        assert_eq!(client.document_url("d3"), "https://registry.example/d3");
        assert_eq!(
            client.document_url("@types/node"),
            "https://registry.example/@types%2fnode"
        );
    }

    #[test]
    fn test_tarball_url_lookup() {
        let document = json!({
            "name": "d3",
            "versions": {
                "4.10.0": {
                    "dist": {
                        "tarball": "https://registry.npmjs.org/d3/-/d3-4.10.0.tgz",
                        "shasum": "0bcca3a3b614e2fd45b1b5bd0b9164d57352a862"
                    }
                }
            }
        });
        assert_eq!(
            tarball_url(&document, "4.10.0").as_deref(),
            Some("https://registry.npmjs.org/d3/-/d3-4.10.0.tgz")
        );
        assert_eq!(tarball_url(&document, "9.9.9"), None);
        assert_eq!(tarball_url(&json!({}), "4.10.0"), None);
    }
}
