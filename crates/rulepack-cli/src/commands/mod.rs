//! Command implementations and dispatch logic.
//!
//! Each command is an async function taking a [`CommandContext`], which
//! carries the project directory, the rulepack home and the output handler.

use rulepack_cache::StagingArea;
use rulepack_config::{rulepack_home, RegistriesFile};
use rulepack_core::error::{RulepackError, RulepackResult};
use rulepack_registry::{build_client, RegistryClient};
use std::path::PathBuf;
use tracing::{debug, info};

pub mod install;
pub mod pack;
pub mod publish;
pub mod registry;
pub mod search;
pub mod staged;


use crate::error::CliResult;
use crate::{output::OutputHandler, Commands};

/// Shared context for all commands
pub struct CommandContext {
    /// Project directory
    pub cwd: PathBuf,
    /// Rulepack data directory (staging area, downloads, git cache)
    pub home: PathBuf,
    /// Registries file
    pub config_path: PathBuf,
    pub output: OutputHandler,
}

impl CommandContext {
    pub fn new() -> RulepackResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| RulepackError::io("Failed to get current directory".to_string(), e))?;
        Ok(Self {
            cwd,
            home: rulepack_home()?,
            config_path: RegistriesFile::default_path()?,
            output: OutputHandler::new(),
        })
    }

    pub fn staging(&self) -> StagingArea {
        StagingArea::new(self.home.join("staging"))
    }

    /// Registries file with `RULEPACK_TOKEN_<NAME>` overrides applied
    ///
    /// Never save the result: it may carry tokens from the environment.
    pub async fn registries(&self) -> RulepackResult<RegistriesFile> {
        let mut file = RegistriesFile::load(&self.config_path).await?;
        file.apply_env_overrides(&RegistriesFile::collect_env_overrides());
        Ok(file)
    }

    /// Client for the named registry, or the active one
    pub async fn client(&self, registry: Option<&str>) -> RulepackResult<Box<dyn RegistryClient>> {
        let file = self.registries().await?;
        let config = file.select(registry)?;
        debug!("Using registry '{}' ({}, {})", config.name, config.kind, config.url);
        build_client(config)
    }
}

/// Dispatch a command to its handler
pub async fn dispatch_command(command: Commands, ctx: &CommandContext) -> CliResult<()> {
    match command {
        Commands::Pack(args) => {
            info!("Packing {:?}", args.files);
            pack::execute(args, ctx).await
        },
        Commands::Publish {
            package,
            registry,
            dry_run,
        } => {
            info!("Publishing staged archives (dry_run: {})", dry_run);
            publish::execute(package, registry, dry_run, ctx).await
        },
        Commands::Install { registry } => {
            info!("Installing dependencies");
            install::execute(registry, ctx).await
        },
        Commands::Uninstall { package } => {
            info!("Uninstalling {}", package);
            install::uninstall(&package, ctx).await
        },
        Commands::Search {
            query,
            tag,
            target,
            limit,
            registry,
        } => search::search(query, tag, target, limit, registry, ctx).await,
        Commands::Info {
            package,
            version,
            registry,
        } => search::info(&package, version.as_deref(), registry, ctx).await,
        Commands::Registry(command) => registry::execute(command, ctx).await,
        Commands::Staged => staged::execute(ctx).await,
    }
}
