//! Registry client construction from configuration

use rulepack_config::RegistryConfig;
use rulepack_core::types::RegistryKind;
use tracing::debug;

use crate::client::RegistryClient;
use crate::git::GitRegistryClient;
use crate::http::HttpRegistryClient;
use crate::RegistryResult;

/// Build the client for a registry, picked by its `type` tag
pub fn build_client(config: &RegistryConfig) -> RegistryResult<Box<dyn RegistryClient>> {
    config.validate()?;
    debug!("Building {} client for registry '{}'", config.kind, config.name);
    Ok(match config.kind {
        RegistryKind::Http => Box::new(HttpRegistryClient::new(config)?),
        RegistryKind::Git => Box::new(GitRegistryClient::new(config)?),
    })
}
