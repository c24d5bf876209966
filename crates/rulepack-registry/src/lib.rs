//! Registry clients for rulepack
//!
//! One contract, `RegistryClient`, over two backends:
//! - `HttpRegistryClient` talks to a rulepack registry server over REST
//! - `GitRegistryClient` keeps a registry in a git repository and publishes
//!   through pull requests
//!
//! `build_client` picks the backend from a registry's configured type, and
//! `PublishOrchestrator` pushes every staged archive through it.

pub mod api;
pub mod cache;
pub mod client;
pub mod factory;
pub mod git;
pub mod http;
pub mod publish;

// Re-export main types
pub use cache::MetadataCache;
pub use client::{with_deadline, with_retry, RegistryClient, RetryConfig};
pub use factory::build_client;
pub use git::{GitRegistryClient, PublishStep, PullRequestOutcome};
pub use http::HttpRegistryClient;
pub use publish::{ItemOutcome, PublishOptions, PublishOrchestrator, PublishReport};

use rulepack_core::error::RulepackError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RulepackError>;
