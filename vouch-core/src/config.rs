//! User configuration (`<home>/config.yml`)
//!
//! Settings are addressed by dotted names (`check.thresholds.trusted`,
//! `extensions.0.timeout_seconds`) for `vouch config get/set`. Setting a value
//! round-trips through the typed struct, so a write can never produce a file
//! that fails to load.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::check::{FailOn, Thresholds};
use crate::extension::ExtensionCommand;
use crate::paths::write_atomic;

fn default_timeout_seconds() -> u64 {
    10
}

fn default_publish_retries() -> u32 {
    3
}

fn default_git_timeout_seconds() -> u64 {
    120
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VouchConfig {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,

    #[serde(default)]
    pub check: CheckConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Remote of the user's own review repository
    #[serde(default)]
    pub repository_url: Option<String>,

    /// Override for the author key location
    #[serde(default)]
    pub author_key_file: Option<PathBuf>,
}

/// A persisted extension registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Ecosystem id reported at registration
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ExtensionConfig {
    pub fn command(&self) -> ExtensionCommand {
        ExtensionCommand::new(self.command.clone(), self.args.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub fail_on: FailOn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,
    #[serde(default = "default_git_timeout_seconds")]
    pub git_timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            publish_retries: default_publish_retries(),
            git_timeout_seconds: default_git_timeout_seconds(),
        }
    }
}

impl SyncConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_seconds)
    }
}

impl VouchConfig {
    /// Load config or return defaults if the file does not exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_yaml_ng::to_string(self)?;
        write_atomic(path, content.as_bytes())
    }

    pub fn validate(&self) -> Result<()> {
        let trusted = self.check.thresholds.trusted;
        if !trusted.is_finite() || !(-1.0..=1.0).contains(&trusted) {
            bail!("check.thresholds.trusted must be within [-1, 1] (got {trusted})");
        }
        if self.check.thresholds.min_distinct_authors == 0 {
            bail!("check.thresholds.min_distinct_authors must be at least 1");
        }
        for (index, extension) in self.extensions.iter().enumerate() {
            if extension.timeout_seconds == 0 {
                bail!("extensions.{index}.timeout_seconds must be at least 1");
            }
        }
        Ok(())
    }

    /// Extension registered for `ecosystem`
    pub fn extension(&self, ecosystem: &str) -> Option<&ExtensionConfig> {
        self.extensions.iter().find(|e| e.name == ecosystem)
    }

    /// Add or replace the registration for an ecosystem
    pub fn upsert_extension(&mut self, extension: ExtensionConfig) {
        self.extensions.retain(|e| e.name != extension.name);
        self.extensions.push(extension);
    }

    /// Returns false when nothing was registered under `ecosystem`
    pub fn remove_extension(&mut self, ecosystem: &str) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e.name != ecosystem);
        self.extensions.len() != before
    }

    /// Read a setting by dotted name
    pub fn get(&self, name: &str) -> Result<String> {
        let root = serde_yaml_ng::to_value(self)?;
        let value = lookup(&root, name)?;
        Ok(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => serde_yaml_ng::to_string(other)?.trim_end().to_string(),
        })
    }

    /// Write a setting by dotted name
    ///
    /// `value` is parsed as a YAML scalar; if that does not fit the field it is
    /// retried as a plain string.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let parsed: Value = serde_yaml_ng::from_str(value).unwrap_or(Value::Null);
        let candidates = [parsed, Value::String(value.to_string())];

        let mut last_error = None;
        for candidate in candidates {
            let mut root = serde_yaml_ng::to_value(&*self)?;
            *lookup_mut(&mut root, name)? = candidate;
            match serde_yaml_ng::from_value::<Self>(root) {
                Ok(updated) => {
                    updated
                        .validate()
                        .with_context(|| format!("Invalid value for {name}"))?;
                    *self = updated;
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(e).with_context(|| format!("Invalid value for {name}: {value}")),
            None => bail!("Invalid value for {name}: {value}"),
        }
    }
}

fn unknown(name: &str) -> anyhow::Error {
    anyhow::anyhow!("Unknown settings field: {name}")
}

fn lookup<'a>(root: &'a Value, name: &str) -> Result<&'a Value> {
    let mut current = root;
    for part in name.split('.') {
        current = match current {
            Value::Mapping(map) => map.get(part),
            Value::Sequence(seq) => part.parse::<usize>().ok().and_then(|i| seq.get(i)),
            _ => None,
        }
        .ok_or_else(|| unknown(name))?;
    }
    Ok(current)
}

fn lookup_mut<'a>(root: &'a mut Value, name: &str) -> Result<&'a mut Value> {
    let mut current = root;
    for part in name.split('.') {
        current = match current {
            Value::Mapping(map) => map.get_mut(part),
            Value::Sequence(seq) => part.parse::<usize>().ok().and_then(|i| seq.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| unknown(name))?;
    }
    // Only leaves are settable
    if matches!(current, Value::Mapping(_) | Value::Sequence(_)) {
        return Err(anyhow::anyhow!("{name} is a section, not a setting"));
    }
    Ok(current)
}
