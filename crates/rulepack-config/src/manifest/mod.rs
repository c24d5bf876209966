//! rulepack.json loading, validation and atomic persistence

use rulepack_core::error::RulepackError;
use rulepack_core::types::{PackageManifest, Version, MANIFEST_FILE_NAME};
use std::io::Write;
use std::path::Path;

use crate::ConfigResult;

/// Parse manifest JSON and validate its fields
pub fn parse_manifest(content: &str) -> ConfigResult<PackageManifest> {
    let manifest: PackageManifest = serde_json::from_str(content).map_err(|e| {
        RulepackError::InvalidFormat {
            what: "manifest".to_string(),
            input: MANIFEST_FILE_NAME.to_string(),
            reason: e.to_string(),
        }
    })?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Validate configuration completeness
pub fn validate_manifest(manifest: &PackageManifest) -> ConfigResult<()> {
    if !PackageManifest::is_valid_name(&manifest.name) {
        return Err(RulepackError::ConfigValidation {
            field: "name".to_string(),
            reason: format!(
                "Invalid package name '{}'. Package names must be lowercase, alphanumeric, and may contain hyphens or underscores",
                manifest.name
            ),
        });
    }

    for name in manifest.dependencies.keys() {
        if !PackageManifest::is_valid_name(name) {
            return Err(RulepackError::ConfigValidation {
                field: format!("dependencies.{}", name),
                reason: "invalid dependency name".to_string(),
            });
        }
    }

    Ok(())
}

/// Load rulepack.json from a project directory
pub fn load_manifest(project_root: &Path) -> ConfigResult<PackageManifest> {
    let path = project_root.join(MANIFEST_FILE_NAME);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| RulepackError::io(format!("Failed to read {}", path.display()), e))?;

    parse_manifest(&content).map_err(|e| match e {
        RulepackError::ConfigValidation { field, reason } => RulepackError::ConfigValidation {
            field,
            reason: format!("In file {}: {}", path.display(), reason),
        },
        other => other,
    })
}

/// Persist rulepack.json atomically
pub fn save_manifest(project_root: &Path, manifest: &PackageManifest) -> ConfigResult<()> {
    let content = serde_json::to_string_pretty(manifest)?;
    write_atomic(&project_root.join(MANIFEST_FILE_NAME), content.as_bytes())
}

/// Initial manifest for a project that has none yet
pub fn default_manifest(name: &str) -> PackageManifest {
    let mut manifest = PackageManifest::new(name.to_string(), Version::initial());
    manifest.files = vec!["*.md".to_string()];
    manifest
}

/// Write to a temporary sibling and rename over the target
pub fn write_atomic(path: &Path, content: &[u8]) -> ConfigResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| RulepackError::io(format!("Failed to create {}", dir.display()), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| RulepackError::io(format!("Failed to create temp file in {}", dir.display()), e))?;
    temp.write_all(content)
        .map_err(|e| RulepackError::io("Failed to write temp file".to_string(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| RulepackError::io("Failed to sync temp file".to_string(), e))?;
    temp.persist(path)
        .map_err(|e| RulepackError::io(format!("Failed to replace {}", path.display()), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_and_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut manifest = default_manifest("security-rules");
        manifest
            .dependencies
            .insert("base-rules".to_string(), "1.0.0".to_string());

        save_manifest(dir.path(), &manifest).unwrap();
        let loaded = load_manifest(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_invalid_name_rejected() {
        let json = r#"{"name": "Bad Name", "version": "1.0.0"}"#;
        let err = parse_manifest(json).unwrap_err();
        assert!(matches!(err, RulepackError::ConfigValidation { .. }));
    }

    #[test]
    fn test_invalid_version_is_format_error() {
        let json = r#"{"name": "ok", "version": "1.0"}"#;
        let err = parse_manifest(json).unwrap_err();
        assert!(matches!(err, RulepackError::InvalidFormat { .. }));
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_manifest(dir.path()).unwrap_err(),
            RulepackError::Io { .. }
        ));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
