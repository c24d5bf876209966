//! Archive building and local staging for rulepack
//!
//! This crate turns a set of rule files into a canonical, sha256-identified
//! `.tgz` archive, keeps pending archives in a staging area until they are
//! published, and extracts downloaded archives on install.

pub mod builder;
pub mod security;
pub mod staging;
pub mod tarball;

// Re-export main types
pub use builder::{ArchiveBuilder, PackRequest, PreviousVersion};
pub use security::{detect_executable, SecurityPolicy};
pub use staging::StagingArea;
pub use tarball::{create_archive, extract_archive, extract_archive_file, read_archive};

use rulepack_core::error::RulepackError;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, RulepackError>;
