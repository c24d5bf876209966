//! Archive creation and extraction
//!
//! Archives are gzip-compressed tar streams with root-relative entries and
//! a `rulepack.json` manifest at the root.

pub mod create;
pub mod extract;

pub use create::{create_archive, write_tar, ArchiveContents, CanonicalArchive};
pub use extract::{
    extract_archive, extract_archive_file, extract_archive_with_policy, read_archive,
};
