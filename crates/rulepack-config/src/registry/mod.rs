//! Registry configuration (`~/.rulepack/config.toml`)
//!
//! ```toml
//! active = "team"
//!
//! [registries.team]
//! url = "https://github.com/acme/rules-registry"
//! type = "git"
//! token = "ghp_..."
//! default_branch = "main"
//!
//! [registries.public]
//! url = "https://registry.example.com"
//! ```
//!
//! Credentials are always looked up on the `RegistryConfig` in hand. The
//! `RULEPACK_TOKEN_<NAME>` environment variable overrides the token of the
//! registry with that name only.

use rulepack_core::error::RulepackError;
use rulepack_core::types::RegistryKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ConfigResult;

/// Default per-call deadline for registry operations
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Prefix of per-registry token overrides
pub const TOKEN_ENV_PREFIX: &str = "RULEPACK_TOKEN_";

/// Secret used to talk to one registry
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Bearer <token>` for HTTP registries
    Bearer(String),
    /// Host token used for git push and the host API
    GitToken(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Credential::Bearer(token) | Credential::GitToken(token) => token,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => write!(f, "Bearer(***)"),
            Credential::GitToken(_) => write!(f, "GitToken(***)"),
        }
    }
}

/// One configured registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Table key in the registries file
    #[serde(skip)]
    pub name: String,
    pub url: String,
    /// Entries without a type predate git registries and are http
    #[serde(rename = "type", default)]
    pub kind: RegistryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Host API base for git registries (derived from `url` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("credential", &self.credential())
            .field("cache_dir", &self.cache_dir)
            .field("default_branch", &self.default_branch)
            .finish_non_exhaustive()
    }
}

impl RegistryConfig {
    /// Minimal entry with defaults for everything but name, url and type
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: RegistryKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind,
            token: None,
            cache_dir: None,
            default_branch: None,
            author_name: None,
            author_email: None,
            timeout_secs: None,
            api_url: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Credential scoped to this registry, shaped by its type
    pub fn credential(&self) -> Option<Credential> {
        let token = self.token.as_ref().filter(|t| !t.is_empty())?.clone();
        Some(match self.kind {
            RegistryKind::Http => Credential::Bearer(token),
            RegistryKind::Git => Credential::GitToken(token),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Git clone cache root, defaulting under the rulepack home
    pub fn cache_root(&self) -> ConfigResult<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(rulepack_home()?.join("git-cache")),
        }
    }

    pub fn default_branch(&self) -> &str {
        self.default_branch.as_deref().unwrap_or("main")
    }

    /// Name of the environment variable that overrides this registry's token
    pub fn token_env_var(&self) -> String {
        format!(
            "{}{}",
            TOKEN_ENV_PREFIX,
            self.name.to_uppercase().replace('-', "_")
        )
    }

    /// Check the fields a client needs before constructing one
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(RulepackError::ConfigValidation {
                field: "name".to_string(),
                reason: "registry name must not be empty".to_string(),
            });
        }
        let parsed = url_scheme(&self.url).ok_or_else(|| RulepackError::ConfigValidation {
            field: format!("registries.{}.url", self.name),
            reason: format!("'{}' is not an absolute URL", self.url),
        })?;
        if !matches!(parsed, "http" | "https" | "file" | "ssh" | "git") {
            return Err(RulepackError::ConfigValidation {
                field: format!("registries.{}.url", self.name),
                reason: format!("unsupported scheme '{}'", parsed),
            });
        }
        if self.timeout_secs == Some(0) {
            return Err(RulepackError::ConfigValidation {
                field: format!("registries.{}.timeout_secs", self.name),
                reason: "timeout must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() || rest.is_empty() {
        return None;
    }
    Some(scheme)
}

/// Contents of the registries file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistriesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,
}

impl RegistriesFile {
    /// Parse TOML content and fill in registry names from their keys
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let mut file: RegistriesFile =
            toml::from_str(content).map_err(|e| RulepackError::InvalidFormat {
                what: "registries file".to_string(),
                input: "config.toml".to_string(),
                reason: e.to_string(),
            })?;
        for (name, registry) in file.registries.iter_mut() {
            registry.name = name.clone();
        }
        Ok(file)
    }

    /// Load from disk; a missing file is an empty configuration
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registries file at {}", path.display());
                Ok(Self::default())
            },
            Err(e) => Err(RulepackError::io(
                format!("Failed to read {}", path.display()),
                e,
            )),
        }
    }

    /// Write the file through a temporary sibling
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| RulepackError::ConfigValidation {
            field: "registries".to_string(),
            reason: format!("Failed to serialize: {}", e),
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RulepackError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let temp = path.with_extension("toml.tmp");
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| RulepackError::io(format!("Failed to write {}", temp.display()), e))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| RulepackError::io(format!("Failed to replace {}", path.display()), e))?;
        Ok(())
    }

    /// Location of the registries file
    pub fn default_path() -> ConfigResult<PathBuf> {
        if let Ok(path) = std::env::var("RULEPACK_CONFIG") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        Ok(rulepack_home()?.join("config.toml"))
    }

    pub fn get(&self, name: &str) -> ConfigResult<&RegistryConfig> {
        self.registries
            .get(name)
            .ok_or_else(|| RulepackError::not_found(format!("registry '{}'", name)))
    }

    /// The registry marked active
    pub fn active(&self) -> ConfigResult<&RegistryConfig> {
        let name = self
            .active
            .as_deref()
            .ok_or_else(|| RulepackError::ConfigValidation {
                field: "active".to_string(),
                reason: "no active registry; run `rulepack registry use <name>`".to_string(),
            })?;
        self.get(name)
    }

    /// An explicitly named registry, or the active one
    pub fn select(&self, name: Option<&str>) -> ConfigResult<&RegistryConfig> {
        match name {
            Some(name) => self.get(name),
            None => self.active(),
        }
    }

    /// Insert or replace a registry; the first one added becomes active
    pub fn add(&mut self, registry: RegistryConfig) -> ConfigResult<()> {
        registry.validate()?;
        if self.active.is_none() {
            self.active = Some(registry.name.clone());
        }
        self.registries.insert(registry.name.clone(), registry);
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> ConfigResult<()> {
        self.get(name)?;
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Apply `RULEPACK_TOKEN_<NAME>` overrides
    pub fn apply_env_overrides(&mut self, overrides: &HashMap<String, String>) {
        for registry in self.registries.values_mut() {
            if let Some(token) = overrides.get(&registry.token_env_var()) {
                debug!("Using token from {} for '{}'", registry.token_env_var(), registry.name);
                registry.token = Some(token.clone());
            }
        }
    }

    /// Collect token overrides from the process environment
    pub fn collect_env_overrides() -> HashMap<String, String> {
        std::env::vars()
            .filter(|(key, _)| key.starts_with(TOKEN_ENV_PREFIX))
            .collect()
    }
}

/// Data directory: `RULEPACK_HOME`, else `~/.rulepack`
pub fn rulepack_home() -> ConfigResult<PathBuf> {
    if let Ok(home) = std::env::var("RULEPACK_HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let home_dir = dirs::home_dir().ok_or_else(|| RulepackError::ConfigValidation {
        field: "home_dir".to_string(),
        reason: "Could not determine home directory".to_string(),
    })?;
    Ok(home_dir.join(".rulepack"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
active = "team"

[registries.team]
url = "https://github.com/acme/rules-registry"
type = "git"
token = "ghp_team"

[registries.public-hub]
url = "https://registry.example.com"
token = "bearer-public"
"#;

    #[test]
    fn test_parse_fills_names_and_defaults_type() {
        let file = RegistriesFile::parse(SAMPLE).unwrap();
        let team = file.get("team").unwrap();
        assert_eq!(team.name, "team");
        assert_eq!(team.kind, RegistryKind::Git);
        assert_eq!(team.default_branch(), "main");

        let public = file.get("public-hub").unwrap();
        assert_eq!(public.kind, RegistryKind::Http);
        assert_eq!(
            public.credential(),
            Some(Credential::Bearer("bearer-public".to_string()))
        );
        assert_eq!(file.active().unwrap().name, "team");
    }

    #[test]
    fn test_credentials_stay_scoped() {
        let mut file = RegistriesFile::parse(SAMPLE).unwrap();
        let overrides = HashMap::from([(
            "RULEPACK_TOKEN_PUBLIC_HUB".to_string(),
            "from-env".to_string(),
        )]);
        file.apply_env_overrides(&overrides);

        assert_eq!(
            file.get("public-hub").unwrap().credential().unwrap().secret(),
            "from-env"
        );
        assert_eq!(
            file.get("team").unwrap().credential(),
            Some(Credential::GitToken("ghp_team".to_string()))
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let file = RegistriesFile::parse(SAMPLE).unwrap();
        let rendered = format!("{:?}", file.get("team").unwrap());
        assert!(!rendered.contains("ghp_team"));
    }

    #[test]
    fn test_unknown_registry_is_not_found() {
        let file = RegistriesFile::parse(SAMPLE).unwrap();
        assert!(matches!(
            file.select(Some("missing")).unwrap_err(),
            RulepackError::NotFound { .. }
        ));
        assert!(file.clone().set_active("missing").is_err());
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let registry = RegistryConfig::new("bad", "registry.example.com", RegistryKind::Http);
        assert!(matches!(
            registry.validate().unwrap_err(),
            RulepackError::ConfigValidation { .. }
        ));
    }

    #[test]
    fn test_first_added_becomes_active() {
        let mut file = RegistriesFile::default();
        file.add(RegistryConfig::new("one", "https://one.example.com", RegistryKind::Http))
            .unwrap();
        file.add(RegistryConfig::new("two", "https://two.example.com", RegistryKind::Http))
            .unwrap();
        assert_eq!(file.active.as_deref(), Some("one"));
        file.set_active("two").unwrap();
        assert_eq!(file.active().unwrap().name, "two");
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let original = RegistriesFile::parse(SAMPLE).unwrap();
        original.save(&path).await.unwrap();
        let loaded = RegistriesFile::load(&path).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = RegistriesFile::load(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert!(loaded.registries.is_empty());
        assert!(loaded.active().is_err());
    }
}
