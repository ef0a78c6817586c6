//! Review records - immutable, signed, content-addressed opinions about one
//! package version.
//!
//! The record id is the SHA-256 of the canonical serialization of every field
//! except `id` and `signature`. The same bytes are what the author signs, so
//! any peer can check both without coordination.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;
use crate::keys::{self, AuthorKey};
use crate::package::PackageIdentity;

/// Lowest allowed rating
pub const RATING_MIN: f64 = -1.0;
/// Highest allowed rating
pub const RATING_MAX: f64 = 1.0;
/// Maximum comment size in bytes
pub const MAX_COMMENT_LEN: usize = 4096;

/// What the reviewer actually said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPayload {
    /// Free-text comment
    #[serde(default)]
    pub comment: String,

    /// Rating in [-1.0, +1.0]; negative means "avoid"
    pub rating: f64,
}

/// A signed, immutable review record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Hex SHA-256 over the canonical body
    pub id: String,

    /// Hex Ed25519 verifying key of the author
    pub author_key: String,

    /// Package version under review
    pub package: PackageIdentity,

    pub payload: ReviewPayload,

    /// Creation time, whole seconds
    pub created_at: DateTime<Utc>,

    /// Id of the earlier record by the same author this one amends
    #[serde(default)]
    pub supersedes: Option<String>,

    /// Hex Ed25519 signature over the canonical body
    pub signature: String,
}

/// Canonical body - field order here is the wire contract
#[derive(Serialize)]
struct CanonicalBody<'a> {
    author_key: &'a str,
    package: &'a PackageIdentity,
    payload: &'a ReviewPayload,
    created_at: &'a DateTime<Utc>,
    supersedes: &'a Option<String>,
}

impl ReviewRecord {
    /// Author and sign a new record
    pub fn create(
        key: &AuthorKey,
        package: PackageIdentity,
        payload: ReviewPayload,
        supersedes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, IntegrityError> {
        let mut record = ReviewRecord {
            id: String::new(),
            author_key: key.public_hex(),
            package,
            payload,
            created_at: created_at.trunc_subsecs(0),
            supersedes,
            signature: String::new(),
        };
        record.validate_fields()?;

        let body = record.canonical_bytes()?;
        record.id = keys::sha256_hex(&body);
        record.signature = key.sign_hex(&body);
        Ok(record)
    }

    /// Serialize the signed fields in canonical form
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, IntegrityError> {
        serde_json::to_vec(&CanonicalBody {
            author_key: &self.author_key,
            package: &self.package,
            payload: &self.payload,
            created_at: &self.created_at,
            supersedes: &self.supersedes,
        })
        .map_err(|e| IntegrityError::InvalidRecord {
            id: self.id.clone(),
            reason: format!("cannot serialize canonical body: {e}"),
        })
    }

    /// Recompute the content hash
    pub fn compute_id(&self) -> Result<String, IntegrityError> {
        Ok(keys::sha256_hex(&self.canonical_bytes()?))
    }

    /// Full verification: schema, content hash and signature
    pub fn verify(&self) -> Result<(), IntegrityError> {
        self.validate_fields()?;

        let body = self.canonical_bytes()?;
        let computed = keys::sha256_hex(&body);
        if computed != self.id {
            return Err(IntegrityError::IdMismatch {
                claimed: self.id.clone(),
                computed,
            });
        }

        match keys::verify_hex(&self.author_key, &body, &self.signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(IntegrityError::BadSignature {
                id: self.id.clone(),
                author_key: self.author_key.clone(),
            }),
            Err(e) => Err(IntegrityError::InvalidKey {
                id: self.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn validate_fields(&self) -> Result<(), IntegrityError> {
        let invalid = |reason: String| IntegrityError::InvalidRecord {
            id: self.id.clone(),
            reason,
        };

        let rating = self.payload.rating;
        if !rating.is_finite() || !(RATING_MIN..=RATING_MAX).contains(&rating) {
            return Err(invalid(format!(
                "rating {rating} outside [{RATING_MIN}, {RATING_MAX}]"
            )));
        }
        if self.payload.comment.len() > MAX_COMMENT_LEN {
            return Err(invalid(format!(
                "comment exceeds {MAX_COMMENT_LEN} bytes"
            )));
        }
        self.package.validate().map_err(invalid)?;
        if let Some(prior) = &self.supersedes {
            if !is_record_id(prior) {
                return Err(invalid(format!("supersedes '{prior}' is not a record id")));
            }
        }
        Ok(())
    }
}

/// True for a 64-character lowercase hex string
pub fn is_record_id(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
