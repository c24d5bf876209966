//! # rulepack-core
//!
//! Core types and utilities shared across all rulepack crates.
//!
//! This crate provides:
//! - The semantic version engine (parse, compare, increment, validate)
//! - Package manifest, registry view and publish result types
//! - `RulepackError`, the error taxonomy every crate reports through
//! - sha256 and archive-path helpers
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (Version, PackageManifest, StagedArchive, etc.)
//! - `error`: Error types and result aliases
//! - `utils`: Hashing and path validation helpers

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{RulepackError, RulepackResult};
pub use types::{
    PackageInfo, PackageManifest, PackageSummary, PublishResult, RegistryKind, SearchQuery,
    StagedArchive, Version, VersionInfo,
};
