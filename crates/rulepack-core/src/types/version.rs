//! Semantic version engine.
//!
//! Parses, orders and increments `major.minor.patch[-prerelease][+build]`
//! versions. Build metadata is carried for display but never takes part in
//! ordering or equality.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use crate::error::RulepackError;

/// Semantic version (major.minor.patch-prerelease+build)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

/// Version parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {input}")]
    InvalidFormat { input: String },

    #[error("Invalid number in version: {component}")]
    InvalidNumber { component: String },

    #[error("Invalid prerelease identifier: {prerelease}")]
    InvalidPrerelease { prerelease: String },

    #[error("Invalid build metadata: {build}")]
    InvalidBuild { build: String },

    #[error("Version {proposed} is not greater than {current}")]
    NotGreater { current: String, proposed: String },

    #[error("Cannot increment {component} of {version}: already at its maximum")]
    Exhausted {
        version: String,
        component: &'static str,
    },
}

impl VersionError {
    /// Attach the package name, turning the error into the shared taxonomy
    pub fn for_package(self, package: &str) -> RulepackError {
        match self {
            VersionError::NotGreater { current, proposed } => RulepackError::VersionRegression {
                package: package.to_string(),
                current,
                proposed,
            },
            other => RulepackError::InvalidFormat {
                what: format!("version of {}", package),
                input: other.input(),
                reason: other.to_string(),
            },
        }
    }

    fn input(&self) -> String {
        match self {
            VersionError::InvalidFormat { input } => input.clone(),
            VersionError::InvalidNumber { component } => component.clone(),
            VersionError::InvalidPrerelease { prerelease } => prerelease.clone(),
            VersionError::InvalidBuild { build } => build.clone(),
            VersionError::NotGreater { proposed, .. } => proposed.clone(),
            VersionError::Exhausted { version, .. } => version.clone(),
        }
    }
}

impl From<VersionError> for RulepackError {
    fn from(err: VersionError) -> Self {
        err.for_package("package")
    }
}

impl Version {
    /// Create a new release version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Version assigned to the first pack of a package
    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Next patch release; pre-release and build are cleared
    pub fn increment_patch(&self) -> Result<Self, VersionError> {
        let patch = self.bump(self.patch, "patch")?;
        Ok(Self::new(self.major, self.minor, patch))
    }

    /// Next minor release; patch resets to 0
    pub fn increment_minor(&self) -> Result<Self, VersionError> {
        let minor = self.bump(self.minor, "minor")?;
        Ok(Self::new(self.major, minor, 0))
    }

    /// Next major release; minor and patch reset to 0
    pub fn increment_major(&self) -> Result<Self, VersionError> {
        let major = self.bump(self.major, "major")?;
        Ok(Self::new(major, 0, 0))
    }

    fn bump(&self, value: u64, component: &'static str) -> Result<u64, VersionError> {
        value.checked_add(1).ok_or_else(|| VersionError::Exhausted {
            version: self.to_string(),
            component,
        })
    }

    /// Get the precedence for comparison (ignores build metadata)
    fn precedence_cmp(&self, other: &Self) -> Ordering {
        match (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch)) {
            Ordering::Equal => match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.as_bytes().cmp(b.as_bytes()),
            },
            other => other,
        }
    }
}

/// Parse a version string
pub fn parse(input: &str) -> Result<Version, VersionError> {
    input.parse()
}

/// Three-way comparison returning -1, 0 or 1
pub fn compare(a: &Version, b: &Version) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Fail unless `proposed` orders strictly after `current`
pub fn validate_increase(current: &Version, proposed: &Version) -> Result<(), VersionError> {
    if compare(proposed, current) <= 0 {
        return Err(VersionError::NotGreater {
            current: current.to_string(),
            proposed: proposed.to_string(),
        });
    }
    Ok(())
}

fn parse_component(component: &str) -> Result<u64, VersionError> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidNumber {
            component: component.to_string(),
        });
    }
    component.parse().map_err(|_| VersionError::InvalidNumber {
        component: component.to_string(),
    })
}

fn is_valid_identifier(ident: &str) -> bool {
    !ident.is_empty()
        && ident
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'))
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();

        // Split on '+' for build metadata
        let (version_part, build) = match input.split_once('+') {
            Some((v, b)) => {
                if !is_valid_identifier(b) {
                    return Err(VersionError::InvalidBuild {
                        build: b.to_string(),
                    });
                }
                (v, Some(b.to_string()))
            },
            None => (input, None),
        };

        // Split on '-' for prerelease
        let (core_part, prerelease) = match version_part.split_once('-') {
            Some((c, p)) => {
                if !is_valid_identifier(p) {
                    return Err(VersionError::InvalidPrerelease {
                        prerelease: p.to_string(),
                    });
                }
                (c, Some(p.to_string()))
            },
            None => (version_part, None),
        };

        let parts: Vec<&str> = core_part.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::InvalidFormat {
                input: input.to_string(),
            });
        }

        Ok(Version {
            major: parse_component(parts[0])?,
            minor: parse_component(parts[1])?,
            patch: parse_component(parts[2])?,
            prerelease,
            build,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;

        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }

        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }

        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.precedence_cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence_cmp(other)
    }
}
