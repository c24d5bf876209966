//! Error types and result aliases for rulepack operations.
//!
//! Every crate in the workspace reports through `RulepackError`. Transport
//! specific failures (HTTP status codes, git stderr, host API payloads) are
//! classified into these variants at the client boundary so callers never
//! branch on transport detail.

use thiserror::Error;

/// Unified error type for all rulepack operations
#[derive(Error, Debug)]
pub enum RulepackError {
    // Local validation errors
    #[error("Invalid {what} '{input}': {reason}")]
    InvalidFormat {
        what: String,
        input: String,
        reason: String,
    },

    #[error("Version regression for {package}: {proposed} is not greater than {current}")]
    VersionRegression {
        package: String,
        current: String,
        proposed: String,
    },

    #[error(
        "File conflict in {package}@{version}: {} already exist in the previous version",
        .files.join(", ")
    )]
    FileConflict {
        package: String,
        version: String,
        files: Vec<String>,
    },

    #[error("Rejected archive entry '{path}': {reason}")]
    SecurityViolation { path: String, reason: String },

    // Registry errors
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Unauthorized for registry '{registry}': {message}")]
    Unauthorized { registry: String, message: String },

    #[error("Insufficient access to registry '{registry}': {message}")]
    InsufficientAccess { registry: String, message: String },

    #[error("{package}@{version} already exists in registry '{registry}'")]
    Conflict {
        package: String,
        version: String,
        registry: String,
    },

    #[error("Registry server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Rate limited by '{registry}': {message}")]
    RateLimited { registry: String, message: String },

    #[error("Invalid registry structure in '{registry}': {reason}")]
    InvalidRegistryStructure { registry: String, reason: String },

    // Network errors
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("git {operation} failed: {stderr}")]
    Git { operation: String, stderr: String },

    // Integrity errors
    #[error("Integrity check failed for {resource}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        resource: String,
        expected: String,
        actual: String,
    },

    // Config errors
    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("Failed to parse JSON: {message}")]
    JsonParse { message: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for rulepack operations
pub type RulepackResult<T> = Result<T, RulepackError>;

impl RulepackError {
    /// Create a connection error from any error type
    pub fn network<E>(message: String, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed {
            message,
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io { message, source }
    }

    /// Create a not-found error for a named resource
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Check if this error is worth retrying by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RulepackError::ConnectionFailed { .. }
                | RulepackError::Timeout { .. }
                | RulepackError::ServerError { .. }
                | RulepackError::RateLimited { .. }
        )
    }

    /// Short machine-readable name of the error class
    pub fn code(&self) -> &'static str {
        match self {
            RulepackError::InvalidFormat { .. } => "invalid-format",
            RulepackError::VersionRegression { .. } => "version-regression",
            RulepackError::FileConflict { .. } => "file-conflict",
            RulepackError::SecurityViolation { .. } => "security-violation",
            RulepackError::NotFound { .. } => "not-found",
            RulepackError::Unauthorized { .. } => "unauthorized",
            RulepackError::InsufficientAccess { .. } => "insufficient-access",
            RulepackError::Conflict { .. } => "conflict",
            RulepackError::ServerError { .. } => "server-error",
            RulepackError::RateLimited { .. } => "rate-limited",
            RulepackError::InvalidRegistryStructure { .. } => "invalid-registry-structure",
            RulepackError::ConnectionFailed { .. } => "connection-failed",
            RulepackError::Timeout { .. } => "timeout",
            RulepackError::Git { .. } => "git",
            RulepackError::IntegrityMismatch { .. } => "integrity-mismatch",
            RulepackError::ConfigValidation { .. } => "config",
            RulepackError::JsonParse { .. } => "json",
            RulepackError::Io { .. } => "io",
        }
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            RulepackError::VersionRegression { .. } => {
                Some("Pass a --version greater than the currently published one")
            },
            RulepackError::FileConflict { .. } => Some(
                "Bump the version explicitly with --version, or mark the file with --replace",
            ),
            RulepackError::Unauthorized { .. } => {
                Some("Check the token configured for this registry")
            },
            RulepackError::InsufficientAccess { .. } => {
                Some("Ask a repository maintainer for write (collaborator) access")
            },
            RulepackError::Conflict { .. } => {
                Some("This version is already published; pack a higher version")
            },
            RulepackError::ConnectionFailed { .. } | RulepackError::Timeout { .. } => {
                Some("Check your network connection and try again")
            },
            RulepackError::RateLimited { .. } => Some("Wait for the API quota to reset and retry"),
            RulepackError::ServerError { .. } => Some("The registry failed; retry later"),
            RulepackError::InvalidRegistryStructure { .. } => Some(
                "The repository must contain a packages/ directory or an index.json file",
            ),
            RulepackError::IntegrityMismatch { .. } => {
                Some("The download was corrupted or tampered with; do not use it")
            },
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RulepackError {
    fn from(err: serde_json::Error) -> Self {
        RulepackError::JsonParse {
            message: err.to_string(),
        }
    }
}
