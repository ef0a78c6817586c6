//! Error types for each failure class, with clear, actionable messages
//!
//! Every class maps to one handling policy: extension and sync errors skip a
//! single ecosystem or peer, integrity errors drop a single record, store
//! errors abort the current command.

use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to an ecosystem extension process
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// The extension process could not be started
    #[error("Failed to spawn extension '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The extension did not answer within its time budget
    #[error("Extension '{ecosystem}' timed out after {seconds}s during {operation}")]
    Timeout {
        ecosystem: String,
        operation: &'static str,
        seconds: u64,
    },

    /// Framing, JSON or schema failure on the extension's output
    #[error("Extension '{ecosystem}' returned a malformed response: {reason}")]
    Malformed { ecosystem: String, reason: String },

    /// Handshake reported an incompatible protocol version
    #[error("Extension '{command}' speaks protocol v{found}, expected v{expected}")]
    ProtocolMismatch {
        command: String,
        expected: u32,
        found: u32,
    },

    /// The extension answered with an explicit error
    #[error("Extension '{ecosystem}' failed: [{code}] {message}")]
    Remote {
        ecosystem: String,
        code: String,
        message: String,
    },

    /// The extension did not declare the capability needed for this call
    #[error("Extension '{ecosystem}' does not support '{capability}'")]
    Unsupported {
        ecosystem: String,
        capability: String,
    },

    /// No extension is registered for the ecosystem
    #[error("No extension registered for ecosystem '{0}'")]
    NotRegistered(String),

    /// Two extensions claimed the same ecosystem
    #[error("An extension for ecosystem '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The manifest search for an ecosystem did not finish
    #[error("Manifest search for '{ecosystem}' failed: {reason}")]
    ManifestSearch { ecosystem: String, reason: String },

    /// Stream closed or failed mid-call
    #[error("I/O failure talking to extension '{ecosystem}'")]
    Io {
        ecosystem: String,
        #[source]
        source: std::io::Error,
    },
}

/// A review record failed verification and must be dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrityError {
    /// Recomputed content hash does not match the claimed id
    #[error("Record id mismatch: claimed {claimed}, content hashes to {computed}")]
    IdMismatch { claimed: String, computed: String },

    /// Signature does not verify against the author key
    #[error("Signature verification failed for record {id} (author {author_key})")]
    BadSignature { id: String, author_key: String },

    /// Author key or signature is not valid key material
    #[error("Invalid key material in record {id}: {reason}")]
    InvalidKey { id: String, reason: String },

    /// The record is structurally invalid (rating range, identity, sizes)
    #[error("Record {id} is invalid: {reason}")]
    InvalidRecord { id: String, reason: String },
}

impl IntegrityError {
    /// Log integrity errors that indicate tampering rather than sloppiness
    pub fn log_if_security_critical(&self) {
        match self {
            IntegrityError::IdMismatch { .. } | IntegrityError::BadSignature { .. } => {
                tracing::error!(target: "security", "INTEGRITY VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}

/// Local review store is unavailable or corrupt. Fatal to the current command.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read or write the store log
    #[error("Review store I/O failure at {path}\n\nThe store can be rebuilt with a full resync from peers.")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A committed log line is unreadable or fails verification
    #[error("Review store is corrupt at {path}, line {line}: {reason}\n\nMove the store aside and run:\n  vouch sync")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Failed to serialize a log entry
    #[error("Failed to encode review store entry")]
    Encode {
        #[source]
        source: serde_json::Error,
    },

    /// An earlier append could not be rolled back
    #[error("Review store at {path} has an unfinished write that could not be undone\n\nReopen the store to recover the last committed state.")]
    Poisoned { path: PathBuf },

    /// The background writer task died before committing
    #[error("Review store writer task failed: {0}")]
    Writer(String),
}

/// Outcome of a failed `put`
#[derive(Error, Debug)]
pub enum PutError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure synchronizing with a single peer
#[derive(Error, Debug)]
pub enum SyncError {
    /// The peer repository could not be reached or fetched
    #[error("Peer {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    /// The peer repository does not follow the review layout
    #[error("Peer {url} has a malformed repository: {reason}")]
    MalformedRemote { url: String, reason: String },

    /// The local store failed while importing the batch
    #[error("Import from peer {url} aborted")]
    Store {
        url: String,
        #[source]
        source: StoreError,
    },

    /// The peer's watermark could not be committed
    #[error("Failed to record sync progress for peer {url}: {reason}")]
    Watermark { url: String, reason: String },
}

/// Failure pushing local reviews to the user's own repository
#[derive(Error, Debug)]
pub enum PublishError {
    /// No outgoing repository has been set up
    #[error("No review repository is configured.\n\nTo create one, run:\n  vouch setup [repo-url]")]
    NotConfigured,

    /// Writing record files into the repository failed
    #[error("Failed to stage reviews in {path}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Push kept being rejected
    #[error("Push rejected after {attempts} attempts: {reason}")]
    Rejected { attempts: u32, reason: String },

    /// Commit or refresh failed
    #[error("Repository operation failed: {0}")]
    Repository(String),
}
