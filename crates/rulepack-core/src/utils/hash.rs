//! SHA-256 hashing utilities for content integrity.
//!
//! Archives and blobs are identified by the lowercase hex SHA-256 of their
//! content.

use crate::error::{RulepackError, RulepackResult};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 hex digest of data
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the SHA-256 hex digest of a file without loading it whole
pub fn sha256_file(path: &Path) -> RulepackResult<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| RulepackError::io(format!("Failed to open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| RulepackError::io(format!("Failed to read {}", path.display()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check that a string looks like a SHA-256 hex digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Verify file integrity against an expected digest
pub fn verify_file_integrity(path: &Path, expected: &str) -> RulepackResult<()> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(RulepackError::IntegrityMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_is_sha256_hex() {
        assert!(is_sha256_hex(&sha256_hex(b"x")));
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }

    #[test]
    fn test_file_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("blob.bin");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(b"test file content").unwrap();
        drop(file);

        let hash = sha256_file(&file_path).unwrap();
        assert_eq!(hash, sha256_hex(b"test file content"));
        assert!(verify_file_integrity(&file_path, &hash).is_ok());

        let err = verify_file_integrity(&file_path, &sha256_hex(b"other")).unwrap_err();
        assert!(matches!(err, RulepackError::IntegrityMismatch { .. }));
    }
}
