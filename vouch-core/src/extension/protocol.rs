//! Extension wire protocol
//!
//! Wire format is JSON with length-prefixed framing: a 4-byte big-endian body
//! length followed by the UTF-8 JSON body. The first exchange on every
//! connection is a handshake; nothing else may be sent before it completes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::package::{NameCase, PackageIdentity, PackageMetadata};

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Capability: the extension can resolve manifests into identities
pub const CAP_DISCOVER: &str = "discover";

/// Capability: the extension can look up registry metadata
pub const CAP_DESCRIBE: &str = "describe";

// ============================================================================
// Request Types
// ============================================================================

/// Core -> extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Exchange protocol version and capabilities.
    Handshake {
        protocol_version: u32,
        capabilities: Vec<String>,
    },

    /// Resolve the dependencies declared by the given manifests.
    Discover {
        /// Project root the user asked about.
        root: PathBuf,
        /// Manifest files under `root` matching the extension's patterns.
        manifests: Vec<PathBuf>,
    },

    /// Look up registry metadata for one package.
    Describe { package: PackageIdentity },

    /// Orderly exit.
    Shutdown,
}

// ============================================================================
// Response Types
// ============================================================================

/// Extension -> core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Handshake reply describing the extension.
    Handshake {
        protocol_version: u32,
        ecosystem_id: String,
        manifest_patterns: Vec<String>,
        capabilities: Vec<String>,
        #[serde(default)]
        name_case: NameCase,
    },

    Discovered { packages: Vec<PackageIdentity> },

    Described { metadata: PackageMetadata },

    /// The request failed on the extension side.
    Error { code: String, message: String },

    /// Acknowledges `Shutdown`.
    Goodbye,
}

/// Framing or decoding failure
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer closed the stream between frames
    #[error("stream closed")]
    Closed,

    #[error("frame of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_BYTES)]
    TooLarge(usize),

    #[error("invalid frame body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one framed message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
