//! Canonical archive creation
//!
//! Entries are sorted by name and every header field that could vary
//! between machines (mtime, owner, mode) is fixed, so the same file set
//! always yields the same bytes and therefore the same sha256.

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use rulepack_core::error::RulepackError;
use rulepack_core::utils::{sha256_hex, validate_archive_path};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tar::{Builder, EntryType, Header};

use crate::CacheResult;

/// Mode written for every file entry
const ENTRY_MODE: u32 = 0o644;

/// In-memory archive contents keyed by root-relative entry name
pub type ArchiveContents = BTreeMap<String, Vec<u8>>;

/// Bytes and identity of a finished archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalArchive {
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl CanonicalArchive {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Write the canonical tar stream for `contents` into `writer`
pub fn write_tar<W: Write>(writer: W, contents: &ArchiveContents) -> CacheResult<W> {
    let mut builder = Builder::new(writer);

    // BTreeMap iteration is already sorted by name
    for (name, data) in contents {
        validate_archive_path(Path::new(name))?;

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        builder
            .append_data(&mut header, name, data.as_slice())
            .map_err(|e| RulepackError::io(format!("Failed to add {} to archive", name), e))?;
    }

    builder
        .into_inner()
        .map_err(|e| RulepackError::io("Failed to finish archive".to_string(), e))
}

/// Build the gzip-compressed canonical archive in memory
pub fn create_archive(contents: &ArchiveContents) -> CacheResult<CanonicalArchive> {
    // Fixed gzip header: no file name, mtime 0
    let encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    let encoder = write_tar(encoder, contents)?;
    let bytes = encoder
        .finish()
        .map_err(|e| RulepackError::io("Failed to compress archive".to_string(), e))?;

    let sha256 = sha256_hex(&bytes);
    Ok(CanonicalArchive { bytes, sha256 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarball::extract::extract_archive;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn contents(entries: &[(&str, &str)]) -> ArchiveContents {
        entries
            .iter()
            .map(|(name, data)| (name.to_string(), data.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_same_contents_same_hash() {
        let a = create_archive(&contents(&[("b.md", "two"), ("a.md", "one")])).unwrap();
        let b = create_archive(&contents(&[("a.md", "one"), ("b.md", "two")])).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let a = create_archive(&contents(&[("a.md", "one")])).unwrap();
        let b = create_archive(&contents(&[("a.md", "one!")])).unwrap();
        assert_ne!(a.sha256, b.sha256);
    }

    #[test]
    fn test_nested_entries_extract() {
        let temp_dir = tempdir().unwrap();
        let archive = create_archive(&contents(&[
            ("rulepack.json", "{}"),
            ("rules/security.md", "# Security"),
        ]))
        .unwrap();

        let files = extract_archive(Cursor::new(archive.bytes), temp_dir.path()).unwrap();
        assert_eq!(files, vec!["rulepack.json".to_string(), "rules/security.md".to_string()]);
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("rules/security.md")).unwrap(),
            "# Security"
        );
    }

    #[test]
    fn test_unsafe_name_refused() {
        let err = create_archive(&contents(&[("../x.md", "x")])).unwrap_err();
        assert!(matches!(err, RulepackError::SecurityViolation { .. }));
    }
}
