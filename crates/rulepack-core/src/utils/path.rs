//! Path checks for archive entries.
//!
//! Archive entries must be root-relative and may not contain `..` segments
//! at all, even ones that would stay inside the root.

use crate::error::{RulepackError, RulepackResult};
use std::path::{Component, Path};

/// Check if a path is safe to place in an archive
pub fn is_safe_path(path: &Path) -> bool {
    validate_archive_path(path).is_ok()
}

/// Validate an archive entry path, explaining the rejection
pub fn validate_archive_path(path: &Path) -> RulepackResult<()> {
    let reject = |reason: &str| RulepackError::SecurityViolation {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(reject("empty path"));
    }
    if path.is_absolute() || path.has_root() {
        return Err(reject("absolute paths are not allowed"));
    }

    let mut normal = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {},
            Component::ParentDir => return Err(reject("'..' path segments are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject("absolute paths are not allowed"))
            },
        }
    }

    if normal == 0 {
        return Err(reject("path names no file"));
    }
    Ok(())
}

/// Root-relative, forward-slash entry name for a validated path
pub fn archive_entry_name(path: &Path) -> RulepackResult<String> {
    validate_archive_path(path)?;
    let parts: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_safe_path() {
        assert!(is_safe_path(Path::new("rules/security.md")));
        assert!(is_safe_path(Path::new("./rules.md")));
        assert!(!is_safe_path(Path::new("../../../etc/passwd")));
        assert!(!is_safe_path(Path::new("rules/../rules.md")));
        assert!(!is_safe_path(Path::new("/absolute/path")));
        assert!(!is_safe_path(Path::new("")));
        assert!(!is_safe_path(Path::new(".")));
    }

    #[test]
    fn test_archive_entry_name() {
        assert_eq!(archive_entry_name(Path::new("./a/b.md")).unwrap(), "a/b.md");
        let err = archive_entry_name(Path::new("a/../b.md")).unwrap_err();
        assert!(matches!(err, RulepackError::SecurityViolation { .. }));
    }
}
