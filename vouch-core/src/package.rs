//! Package identities - the aggregation key shared by every component.
//!
//! Identities coming from extensions are untrusted. [`PackageIdentity::normalized`]
//! applies the owning extension's case rule and rejects anything that could not
//! be a real package coordinate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of any identity component, in bytes
pub const MAX_COMPONENT_LEN: usize = 214;

static ECOSYSTEM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("static regex"));

/// How an ecosystem treats package name case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameCase {
    /// Names are case-sensitive and kept as given
    #[default]
    Preserve,
    /// Names are case-insensitive and stored lowercased
    Lowercase,
}

/// A package version within an ecosystem
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub ecosystem: String,
    pub name: String,
    pub version: String,
}

impl PackageIdentity {
    /// Build an identity without normalization (trusted, local input)
    pub fn new(
        ecosystem: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            ecosystem: ecosystem.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Canonicalize and validate an identity
    pub fn normalized(
        ecosystem: &str,
        name: &str,
        version: &str,
        name_case: NameCase,
    ) -> Result<Self, String> {
        let name = name.trim();
        let identity = Self {
            ecosystem: ecosystem.trim().to_lowercase(),
            name: match name_case {
                NameCase::Preserve => name.to_string(),
                NameCase::Lowercase => name.to_lowercase(),
            },
            version: version.trim().to_string(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Re-apply normalization to an identity received from outside
    pub fn renormalize(&self, name_case: NameCase) -> Result<Self, String> {
        Self::normalized(&self.ecosystem, &self.name, &self.version, name_case)
    }

    /// Check the structural rules every stored identity must satisfy
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("ecosystem", &self.ecosystem),
            ("name", &self.name),
            ("version", &self.version),
        ] {
            if value.is_empty() {
                return Err(format!("package {field} is empty"));
            }
            if value.len() > MAX_COMPONENT_LEN {
                return Err(format!(
                    "package {field} exceeds {MAX_COMPONENT_LEN} bytes"
                ));
            }
            if value.chars().any(char::is_control) {
                return Err(format!("package {field} contains control characters"));
            }
        }
        if !ECOSYSTEM_PATTERN.is_match(&self.ecosystem) {
            return Err(format!("invalid ecosystem id '{}'", self.ecosystem));
        }
        Ok(())
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.ecosystem, self.name, self.version)
    }
}

/// Optional registry metadata returned by an extension's `describe`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_package_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_package_version_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code_sha256: Option<String>,
}
