//! Archive extraction
//!
//! Only regular files and directories are accepted. Links, devices and
//! any entry whose path escapes the destination abort the extraction.

use flate2::read::GzDecoder;
use rulepack_core::error::RulepackError;
use rulepack_core::utils::archive_entry_name;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};

use crate::security::SecurityPolicy;
use crate::tarball::create::ArchiveContents;
use crate::CacheResult;

/// Extract a gzipped archive under `dest_dir`, returning the file names written
pub fn extract_archive<R: Read>(reader: R, dest_dir: &Path) -> CacheResult<Vec<String>> {
    extract_archive_with_policy(reader, dest_dir, &SecurityPolicy::default())
}

/// Extract with explicit size limits
pub fn extract_archive_with_policy<R: Read>(
    reader: R,
    dest_dir: &Path,
    policy: &SecurityPolicy,
) -> CacheResult<Vec<String>> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| RulepackError::io(format!("Failed to create {}", dest_dir.display()), e))?;

    let mut written = Vec::new();
    let mut total = 0u64;
    let mut archive = Archive::new(GzDecoder::new(reader));
    let entries = archive
        .entries()
        .map_err(|e| RulepackError::io("Failed to read archive".to_string(), e))?;

    for entry_result in entries {
        let mut entry =
            entry_result.map_err(|e| RulepackError::io("Corrupt archive entry".to_string(), e))?;
        let raw_path = entry
            .path()
            .map_err(|e| RulepackError::io("Invalid archive entry path".to_string(), e))?
            .into_owned();
        let name = archive_entry_name(&raw_path)?;
        let target = dest_dir.join(&name);

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.header().size().unwrap_or(u64::MAX);
                if size > policy.max_file_bytes {
                    return Err(RulepackError::SecurityViolation {
                        path: name,
                        reason: format!("entry exceeds the {} byte limit", policy.max_file_bytes),
                    });
                }
                total = total.saturating_add(size);
                policy.check_total(total)?;

                write_entry(&mut entry, &target)?;
                written.push(name);
            },
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| {
                    RulepackError::io(format!("Failed to create {}", target.display()), e)
                })?;
            },
            other => {
                return Err(RulepackError::SecurityViolation {
                    path: name,
                    reason: format!("unsupported entry type {:?}", other),
                });
            },
        }
    }

    written.sort();
    Ok(written)
}

/// Extract a `.tgz` file from disk
pub fn extract_archive_file(archive_path: &Path, dest_dir: &Path) -> CacheResult<Vec<String>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| RulepackError::io(format!("Failed to open {}", archive_path.display()), e))?;
    extract_archive(std::io::BufReader::new(file), dest_dir)
}

/// Read every regular file of an archive into memory
pub fn read_archive<R: Read>(reader: R, policy: &SecurityPolicy) -> CacheResult<ArchiveContents> {
    let mut contents = ArchiveContents::new();
    let mut archive = Archive::new(GzDecoder::new(reader));
    let entries = archive
        .entries()
        .map_err(|e| RulepackError::io("Failed to read archive".to_string(), e))?;

    for entry_result in entries {
        let mut entry =
            entry_result.map_err(|e| RulepackError::io("Corrupt archive entry".to_string(), e))?;
        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {},
            EntryType::Directory => continue,
            other => {
                return Err(RulepackError::SecurityViolation {
                    path: entry
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    reason: format!("unsupported entry type {:?}", other),
                });
            },
        }

        let raw_path: PathBuf = entry
            .path()
            .map_err(|e| RulepackError::io("Invalid archive entry path".to_string(), e))?
            .into_owned();
        let name = archive_entry_name(&raw_path)?;

        let mut data = Vec::new();
        (&mut entry)
            .take(policy.max_file_bytes + 1)
            .read_to_end(&mut data)
            .map_err(|e| RulepackError::io(format!("Failed to read {}", name), e))?;
        policy.check_entry(&name, &data)?;
        contents.insert(name, data);
    }

    policy.check_total(contents.values().map(|d| d.len() as u64).sum())?;
    Ok(contents)
}

fn write_entry<R: Read>(entry: &mut R, target: &Path) -> CacheResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RulepackError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    let mut file = fs::File::create(target)
        .map_err(|e| RulepackError::io(format!("Failed to create {}", target.display()), e))?;
    std::io::copy(entry, &mut file)
        .map_err(|e| RulepackError::io(format!("Failed to write {}", target.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarball::create::create_archive;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;
    use tar::{Builder, Header};
    use tempfile::tempdir;

    /// Hand-built archive with a raw header name, bypassing path checks
    fn raw_archive(name: &[u8], entry_type: EntryType, data: &[u8]) -> Vec<u8> {
        let mut tarball_data = Vec::new();
        {
            let gz_encoder = GzEncoder::new(&mut tarball_data, Compression::default());
            let mut tar_builder = Builder::new(gz_encoder);

            let mut header = Header::new_gnu();
            {
                let gnu = header.as_gnu_mut().unwrap();
                gnu.name[..name.len()].copy_from_slice(name);
            }
            header.set_entry_type(entry_type);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar_builder.append(&header, data).unwrap();
            tar_builder.into_inner().unwrap().finish().unwrap();
        }
        tarball_data
    }

    #[test]
    fn test_extract_simple_archive() {
        let temp_dir = tempdir().unwrap();
        let data = raw_archive(b"test.md", EntryType::Regular, b"hello world");

        let files = extract_archive(Cursor::new(data), temp_dir.path()).unwrap();
        assert_eq!(files, vec!["test.md".to_string()]);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("test.md")).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn test_directory_traversal_rejected() {
        let temp_dir = tempdir().unwrap();
        let dest = temp_dir.path().join("dest");
        let data = raw_archive(b"../escape.md", EntryType::Regular, b"x");

        let err = extract_archive(Cursor::new(data), &dest).unwrap_err();
        assert!(matches!(err, RulepackError::SecurityViolation { .. }));
        assert!(!temp_dir.path().join("escape.md").exists());
    }

    #[test]
    fn test_absolute_path_rejected() {
        let temp_dir = tempdir().unwrap();
        let data = raw_archive(b"/tmp/abs.md", EntryType::Regular, b"x");
        assert!(extract_archive(Cursor::new(data), temp_dir.path()).is_err());
    }

    #[test]
    fn test_symlink_entry_rejected() {
        let temp_dir = tempdir().unwrap();
        let data = raw_archive(b"link.md", EntryType::Symlink, b"");
        let err = extract_archive(Cursor::new(data), temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported entry type"));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let temp_dir = tempdir().unwrap();
        let data = raw_archive(b"big.md", EntryType::Regular, &[b'a'; 64]);
        let policy = SecurityPolicy {
            max_file_bytes: 16,
            max_total_bytes: 1024,
        };
        assert!(extract_archive_with_policy(Cursor::new(data), temp_dir.path(), &policy).is_err());
    }

    #[test]
    fn test_read_archive_applies_filter() {
        let mut contents = ArchiveContents::new();
        contents.insert("tool".to_string(), b"\x7fELF....".to_vec());
        let archive = create_archive(&contents).unwrap();

        let err = read_archive(Cursor::new(archive.bytes), &SecurityPolicy::default()).unwrap_err();
        assert!(matches!(err, RulepackError::SecurityViolation { .. }));
    }
}
