//! Review repository layout
//!
//! `reviews/<ecosystem>/<name>/<version>/<record-id>.json`, each component
//! percent-encoded so any identity maps to one safe relative path. This path
//! scheme is the only contract between peers.
//!
//! An encoded component longer than [`MAX_ENCODED_LEN`] is stored as a
//! prefix of its encoding, `~`, and the SHA-256 of the raw value, which keeps
//! every file name well under the usual 255-byte limit.

use std::path::{Component, Path, PathBuf};

use crate::keys::sha256_hex;
use crate::review::{self, ReviewRecord};

/// Top-level directory holding every record
pub const REVIEWS_DIR: &str = "reviews";

const RECORD_EXTENSION: &str = "json";

/// Longest percent-encoded component written verbatim
pub const MAX_ENCODED_LEN: usize = 200;

/// Bytes of the encoding kept in front of the digest of a long component
const HASHED_PREFIX_LEN: usize = 128;

const HASH_SEPARATOR: char = '~';

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

/// Percent-encode one path component
///
/// Bytes outside `[A-Za-z0-9._-]` become `%XX`. `.` and `..` are encoded in
/// full so no component can be a directory reference.
pub fn encode_component(value: &str) -> String {
    if value == "." || value == ".." {
        return "%2E".repeat(value.len());
    }

    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if is_unreserved(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    if encoded.len() <= MAX_ENCODED_LEN {
        return encoded;
    }

    // Never split a %XX escape
    let mut cut = HASHED_PREFIX_LEN;
    if let Some(pos) = encoded[..cut].rfind('%') {
        if pos + 3 > cut {
            cut = pos;
        }
    }
    format!(
        "{}{HASH_SEPARATOR}{}",
        &encoded[..cut],
        sha256_hex(value.as_bytes())
    )
}

/// True for the prefix-and-digest form of an over-long component
fn is_hashed_component(value: &str) -> bool {
    match value.rsplit_once(HASH_SEPARATOR) {
        Some((prefix, digest)) => {
            prefix.len() <= HASHED_PREFIX_LEN
                && digest.len() == 64
                && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
                && decode_component(prefix).is_some()
        }
        None => false,
    }
}

/// Reverse [`encode_component`]; `None` for malformed escapes or non-UTF-8
pub fn decode_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = value.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_unreserved(byte) => {
                decoded.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(decoded).ok()
}

/// Relative path of a record inside a review repository
pub fn record_path(record: &ReviewRecord) -> PathBuf {
    let package = &record.package;
    PathBuf::from(REVIEWS_DIR)
        .join(encode_component(&package.ecosystem))
        .join(encode_component(&package.name))
        .join(encode_component(&package.version))
        .join(format!("{}.{RECORD_EXTENSION}", record.id))
}

/// True if `path` has the shape of a record file (no content checks)
pub fn is_record_path(path: &Path) -> bool {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();

    if parts.len() != 5 || path.components().count() != 5 || parts[0] != REVIEWS_DIR {
        return false;
    }
    let file = Path::new(parts[4]);
    let id_ok = file
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(review::is_record_id);
    let ext_ok = file.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION);
    id_ok
        && ext_ok
        && parts[1..4]
            .iter()
            .all(|p| decode_component(p).is_some() || is_hashed_component(p))
}

/// Check that a fetched record sits at the path its content dictates
pub fn check_record_location(path: &Path, record: &ReviewRecord) -> Result<(), String> {
    let expected = record_path(record);
    if path == expected {
        Ok(())
    } else {
        Err(format!(
            "record {} found at {}, expected {}",
            record.id,
            path.display(),
            expected.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AuthorKey;
    use crate::package::PackageIdentity;
    use crate::review::ReviewPayload;
    use chrono::Utc;

    #[test]
    fn test_scoped_npm_name_is_encoded() {
        assert_eq!(encode_component("@scope/pkg"), "%40scope%2Fpkg");
        assert_eq!(decode_component("%40scope%2Fpkg").as_deref(), Some("@scope/pkg"));
    }

    #[test]
    fn test_dot_components_are_fully_encoded() {
        assert_eq!(encode_component("."), "%2E");
        assert_eq!(encode_component(".."), "%2E%2E");
        assert_eq!(encode_component("1.0.0"), "1.0.0");
    }

    #[test]
    fn test_long_component_is_bounded() {
        let name = "@".repeat(214);
        let encoded = encode_component(&name);
        assert!(encoded.len() <= MAX_ENCODED_LEN);
        assert!(encoded.starts_with("%40%40"));
        assert!(encoded.ends_with(&sha256_hex(name.as_bytes())));
        assert!(is_hashed_component(&encoded));

        // Distinct long names stay distinct
        let other = format!("{}a", "@".repeat(213));
        assert_ne!(encode_component(&other), encoded);

        // The prefix never ends inside an escape
        let prefix = encoded.rsplit_once(HASH_SEPARATOR).unwrap().0;
        assert!(decode_component(prefix).is_some());

        assert_eq!(encode_component(&"a".repeat(200)), "a".repeat(200));
    }

    #[test]
    fn test_long_record_path_is_accepted() {
        let key = AuthorKey::generate();
        let record = ReviewRecord::create(
            &key,
            PackageIdentity::new("npm", &"@".repeat(100), "1.0.0"),
            ReviewPayload {
                comment: String::new(),
                rating: 0.5,
            },
            None,
            Utc::now(),
        )
        .unwrap();

        let path = record_path(&record);
        assert!(path.components().all(|c| c.as_os_str().len() < 255));
        assert!(is_record_path(&path));
        assert!(check_record_location(&path, &record).is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode_component("%4"), None);
        assert_eq!(decode_component("%zz"), None);
        assert_eq!(decode_component("a b"), None);
    }

    #[test]
    fn test_record_path_shape() {
        let key = AuthorKey::generate();
        let record = ReviewRecord::create(
            &key,
            PackageIdentity::new("npm", "@types/node", "20.1.0"),
            ReviewPayload {
                comment: String::new(),
                rating: 0.5,
            },
            None,
            Utc::now(),
        )
        .unwrap();

        let path = record_path(&record);
        assert_eq!(
            path,
            PathBuf::from(format!("reviews/npm/%40types%2Fnode/20.1.0/{}.json", record.id))
        );
        assert!(is_record_path(&path));
        assert!(check_record_location(&path, &record).is_ok());
        assert!(check_record_location(Path::new("reviews/npm/x/1/a.json"), &record).is_err());
    }

    #[test]
    fn test_is_record_path_rejects_other_files() {
        assert!(!is_record_path(Path::new("README.md")));
        assert!(!is_record_path(Path::new("reviews/npm/d3/4.10.0/notes.txt")));
        assert!(!is_record_path(Path::new("reviews/../d3/4.10.0/x.json")));
    }
}
