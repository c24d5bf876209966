//! Utility functions and helpers.
//!
//! Common functionality used across multiple rulepack crates.

pub mod hash;
pub mod path;

// Re-export commonly used utilities
pub use hash::{is_sha256_hex, sha256_file, sha256_hex, verify_file_integrity};
pub use path::{archive_entry_name, is_safe_path, validate_archive_path};
