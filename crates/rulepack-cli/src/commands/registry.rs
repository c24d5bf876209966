//! `rulepack registry`: manage the registries file
//!
//! These commands read and write the file as stored. Environment token
//! overrides are never applied here, so they cannot end up on disk.

use rulepack_config::{RegistriesFile, RegistryConfig};

use super::CommandContext;
use crate::error::CliResult;
use crate::RegistryCommand;

pub async fn execute(command: RegistryCommand, ctx: &CommandContext) -> CliResult<()> {
    let mut file = RegistriesFile::load(&ctx.config_path).await?;

    match command {
        RegistryCommand::List => {
            if file.registries.is_empty() {
                ctx.output
                    .info("No registries configured; add one with `rulepack registry add`");
                return Ok(());
            }
            for registry in file.registries.values() {
                let marker = if file.active.as_deref() == Some(registry.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                let token = if registry.credential().is_some() {
                    " (token)"
                } else {
                    ""
                };
                ctx.output.line(&format!(
                    "{} {} [{}] {}{}",
                    marker, registry.name, registry.kind, registry.url, token
                ));
            }
        },
        RegistryCommand::Add {
            name,
            url,
            kind,
            token,
            branch,
        } => {
            let mut registry = RegistryConfig::new(name.clone(), url, kind);
            if let Some(token) = token {
                registry = registry.with_token(token);
            }
            registry.default_branch = branch;

            file.add(registry)?;
            file.save(&ctx.config_path).await?;
            ctx.output.success(&format!("Added registry '{}'", name));
            if file.active.as_deref() == Some(name.as_str()) {
                ctx.output.info(&format!("'{}' is the active registry", name));
            }
        },
        RegistryCommand::Use { name } => {
            file.set_active(&name)?;
            file.save(&ctx.config_path).await?;
            ctx.output.success(&format!("Using registry '{}'", name));
        },
    }
    Ok(())
}
