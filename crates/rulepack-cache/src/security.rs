//! Archive content filter
//!
//! Every file that goes into (or comes out of) an archive passes through
//! `SecurityPolicy`. Failures are hard errors.

use rulepack_core::error::RulepackError;
use rulepack_core::utils::validate_archive_path;
use std::fs::Metadata;
use std::path::Path;

use crate::CacheResult;

/// Default per-file ceiling (1 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Default ceiling for the sum of all files (10 MiB)
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

/// Limits applied to archive contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

impl SecurityPolicy {
    /// Reject symlinks, devices, fifos and directories where a file is expected
    pub fn check_file_type(&self, name: &str, metadata: &Metadata) -> CacheResult<()> {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            return Err(violation(name, "symbolic links are not allowed"));
        }
        if !file_type.is_file() {
            return Err(violation(name, "only regular files are allowed"));
        }
        Ok(())
    }

    /// Path shape, size ceiling and executable signature of one entry
    pub fn check_entry(&self, name: &str, content: &[u8]) -> CacheResult<()> {
        validate_archive_path(Path::new(name))?;

        let size = content.len() as u64;
        if size > self.max_file_bytes {
            return Err(violation(
                name,
                &format!(
                    "file is {} bytes, larger than the {} byte limit",
                    size, self.max_file_bytes
                ),
            ));
        }

        if let Some(kind) = detect_executable(content) {
            return Err(violation(name, &format!("{} binaries are not allowed", kind)));
        }

        Ok(())
    }

    /// Ceiling for the archive as a whole
    pub fn check_total(&self, total_bytes: u64) -> CacheResult<()> {
        if total_bytes > self.max_total_bytes {
            return Err(violation(
                "<archive>",
                &format!(
                    "contents total {} bytes, larger than the {} byte limit",
                    total_bytes, self.max_total_bytes
                ),
            ));
        }
        Ok(())
    }
}

/// Recognize compiled executable formats by magic number
///
/// Script shebangs (`#!`) are text and are not reported.
pub fn detect_executable(content: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x7fELF", "ELF"),
        (b"MZ", "PE"),
        (&[0xfe, 0xed, 0xfa, 0xce], "Mach-O"),
        (&[0xfe, 0xed, 0xfa, 0xcf], "Mach-O"),
        (&[0xce, 0xfa, 0xed, 0xfe], "Mach-O"),
        (&[0xcf, 0xfa, 0xed, 0xfe], "Mach-O"),
        (&[0xca, 0xfe, 0xba, 0xbe], "Mach-O universal"),
        (b"\0asm", "WebAssembly"),
    ];

    SIGNATURES
        .iter()
        .find(|(magic, _)| content.starts_with(magic))
        .map(|(_, kind)| *kind)
}

fn violation(path: &str, reason: &str) -> RulepackError {
    RulepackError::SecurityViolation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
