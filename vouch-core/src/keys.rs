//! Author keys and review hashing
//!
//! Uses SHA-256 for record ids and Ed25519 for record signatures. An author's
//! identity is nothing more than the hex encoding of their verifying key.

use anyhow::{Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Hash bytes with SHA-256, returning lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// The local author's signing key
pub struct AuthorKey {
    signing_key: SigningKey,
}

impl AuthorKey {
    /// Generate a fresh key from the OS RNG
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from a 32-byte secret
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Load the key from disk, or create and persist a new one
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        info!("Generating new author key at {}", path.display());
        let key = Self::generate();
        key.save(path)?;
        Ok(key)
    }

    /// Load a hex-encoded secret key
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read author key: {}", path.display()))?;
        let bytes = hex::decode(content.trim()).context("Author key is not valid hex")?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Author key must be 32 bytes, got {}", bytes.len()))?;
        debug!("Loaded author key from {}", path.display());
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Persist the secret key, readable only by the owner on unix
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create key directory: {}", parent.display()))?;
        }
        std::fs::write(path, hex::encode(self.signing_key.to_bytes()))
            .with_context(|| format!("Failed to write author key: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict author key permissions")?;
        }
        Ok(())
    }

    /// Hex-encoded verifying key, used as `author_key` in records
    pub fn public_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message, returning the hex-encoded signature
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

/// Reasons a signature check can fail before the math runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyMaterialError {
    #[error("author key: {0}")]
    PublicKey(String),

    #[error("signature: {0}")]
    Signature(String),
}

/// Verify a hex signature against a hex verifying key
///
/// Returns `Ok(false)` for a well-formed signature that does not verify.
pub fn verify_hex(
    public_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<bool, KeyMaterialError> {
    let pk_bytes = hex::decode(public_hex)
        .map_err(|e| KeyMaterialError::PublicKey(format!("not hex: {e}")))?;
    let pk: &[u8; 32] = pk_bytes.as_slice().try_into().map_err(|_| {
        KeyMaterialError::PublicKey(format!("must be 32 bytes, got {}", pk_bytes.len()))
    })?;
    let vk = VerifyingKey::from_bytes(pk)
        .map_err(|e| KeyMaterialError::PublicKey(format!("invalid Ed25519 key: {e}")))?;

    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| KeyMaterialError::Signature(format!("not hex: {e}")))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| KeyMaterialError::Signature(format!("malformed: {e}")))?;

    Ok(vk.verify(message, &sig).is_ok())
}
