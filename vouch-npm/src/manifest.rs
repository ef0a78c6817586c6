//! Dependency extraction from `package.json` and `package-lock.json`
//!
//! A lockfile pins exact versions, so when a directory has one its
//! `package.json` is not consulted. Without a lockfile, a `package.json` range
//! counts only when it names a single full version (`1.2.3`, `^1.2.3`,
//! `~1.2.3`, `=1.2.3`); anything wider cannot be mapped to one reviewable
//! release and is skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const PACKAGE_JSON: &str = "package.json";
pub const PACKAGE_LOCK: &str = "package-lock.json";

/// A `(name, version)` pair found in a manifest
pub type Dependency = (String, String);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageLock {
    /// lockfileVersion 2 and 3
    #[serde(default)]
    packages: BTreeMap<String, LockPackage>,
    /// lockfileVersion 1
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

#[derive(Debug, Default, Deserialize)]
struct LockPackage {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    link: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LockDependency {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockDependency>,
}

/// Collect the dependencies declared by `manifests`
pub fn collect_dependencies(manifests: &[PathBuf]) -> Result<BTreeSet<Dependency>> {
    let mut lockfiles = BTreeSet::new();
    let mut package_jsons = Vec::new();
    for manifest in manifests {
        if file_name_is(manifest, PACKAGE_LOCK) {
            lockfiles.insert(manifest.clone());
        } else if file_name_is(manifest, PACKAGE_JSON) {
            let sibling = manifest.with_file_name(PACKAGE_LOCK);
            if sibling.is_file() {
                debug!("{} has a lockfile, using it instead", manifest.display());
                lockfiles.insert(sibling);
            } else {
                package_jsons.push(manifest);
            }
        } else {
            trace!("Ignoring unrecognised manifest {}", manifest.display());
        }
    }

    let mut found = BTreeSet::new();
    for lockfile in &lockfiles {
        found.extend(read_lockfile(lockfile)?);
    }
    for manifest in package_jsons {
        found.extend(read_package_json(manifest)?);
    }
    Ok(found)
}

fn file_name_is(path: &Path, name: &str) -> bool {
    path.file_name().is_some_and(|n| n == name)
}

fn read_package_json(path: &Path) -> Result<Vec<Dependency>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_package_json(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_lockfile(path: &Path) -> Result<Vec<Dependency>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_lockfile(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_package_json(text: &str) -> Result<Vec<Dependency>> {
    let manifest: PackageJson = serde_json::from_str(text)?;
    let declared = manifest
        .dependencies
        .into_iter()
        .chain(manifest.dev_dependencies)
        .chain(manifest.optional_dependencies);

    let mut dependencies = Vec::new();
    for (name, range) in declared {
        match pinned_version(&range) {
            Some(version) => dependencies.push((name, version.to_string())),
            None => debug!("Skipping {}@{}: not a single version", name, range),
        }
    }
    Ok(dependencies)
}

pub fn parse_lockfile(text: &str) -> Result<Vec<Dependency>> {
    let lock: PackageLock = serde_json::from_str(text)?;
    let mut dependencies = Vec::new();

    if !lock.packages.is_empty() {
        for (key, entry) in lock.packages {
            if entry.link {
                continue;
            }
            // "" is the project itself; keys outside node_modules are workspace members
            let Some(installed_as) = key.rsplit_once("node_modules/").map(|(_, n)| n) else {
                continue;
            };
            let name = entry.name.unwrap_or_else(|| installed_as.to_string());
            if let Some(version) = entry.version.as_deref().and_then(exact_version) {
                dependencies.push((name, version.to_string()));
            }
        }
    } else {
        flatten_v1(lock.dependencies, &mut dependencies);
    }
    Ok(dependencies)
}

fn flatten_v1(tree: BTreeMap<String, LockDependency>, out: &mut Vec<Dependency>) {
    for (name, dependency) in tree {
        // git and file dependencies carry a URL here instead of a version
        if let Some(version) = dependency.version.as_deref().and_then(exact_version) {
            out.push((name, version.to_string()));
        }
        flatten_v1(dependency.dependencies, out);
    }
}

/// The single version a `package.json` range allows, if it allows only one
fn pinned_version(range: &str) -> Option<&str> {
    let range = range.trim();
    let range = range
        .strip_prefix('^')
        .or_else(|| range.strip_prefix('~'))
        .or_else(|| range.strip_prefix('='))
        .unwrap_or(range);
    exact_version(range)
}

/// `major.minor.patch` with optional prerelease/build suffix
fn exact_version(version: &str) -> Option<&str> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    let numeric = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    let clean = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
    (numeric && clean).then_some(version)
}
