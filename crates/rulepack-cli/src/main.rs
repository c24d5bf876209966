//! # rulepack
//!
//! Pack, publish and install versioned rule bundles.
//!
//! This is the entry point of the `rulepack` binary. It parses the command
//! line, sets up logging and dispatches to the command handlers; any error
//! is printed with a suggestion and turns into exit code 1.

use clap::{Args, Parser, Subcommand};
use rulepack_core::error::RulepackError;
use rulepack_core::types::{RegistryKind, Version};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

mod commands;
mod error;
mod output;

use commands::CommandContext;
use error::CliResult;
use output::ErrorFormatter;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("RULEPACK_COMMIT"),
    " ",
    env!("RULEPACK_BUILD_DATE"),
    ")"
);

/// Pack, publish and install versioned rule bundles
#[derive(Parser)]
#[command(name = "rulepack", version, long_version = LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pack files into a staged archive
    Pack(PackArgs),
    /// Publish staged archives
    Publish {
        /// Only publish this package's staged archive
        package: Option<String>,
        #[arg(long)]
        registry: Option<String>,
        /// Show what would be published
        #[arg(long)]
        dry_run: bool,
    },
    /// Install the dependencies declared in rulepack.json
    Install {
        #[arg(long)]
        registry: Option<String>,
    },
    /// Remove an installed package
    Uninstall { package: String },
    /// Search a registry
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        registry: Option<String>,
    },
    /// Show a package or one of its versions
    Info {
        package: String,
        #[arg(long = "version", value_name = "VERSION")]
        version: Option<String>,
        #[arg(long)]
        registry: Option<String>,
    },
    /// Manage configured registries
    #[command(subcommand)]
    Registry(RegistryCommand),
    /// List archives waiting to be published
    Staged,
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Files or directories to include
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Package name (defaults to the name in rulepack.json)
    #[arg(long)]
    pub name: Option<String>,
    /// Explicit version; must be greater than the installed one
    #[arg(long = "version", value_name = "VERSION")]
    pub version: Option<Version>,
    /// Archive entry allowed to overwrite the previous version's file
    #[arg(long = "replace", value_name = "FILE")]
    pub replace: Vec<String>,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long = "target")]
    pub targets: Vec<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub license: Option<String>,
}

#[derive(Subcommand)]
pub enum RegistryCommand {
    /// List configured registries
    List,
    /// Add or replace a registry
    Add {
        name: String,
        url: String,
        #[arg(long = "type", default_value = "http")]
        kind: RegistryKind,
        #[arg(long)]
        token: Option<String>,
        /// Branch pull requests target (git registries)
        #[arg(long)]
        branch: Option<String>,
    },
    /// Make a registry the active one
    Use { name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    setup_panic_handler();

    debug!("Starting rulepack v{}", env!("CARGO_PKG_VERSION"));

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", ErrorFormatter::new().format_error(&e));
            ExitCode::FAILURE
        },
    }
}

fn run_cli(cli: Cli) -> CliResult<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| RulepackError::io("Failed to create async runtime".to_string(), e))?;

    rt.block_on(async {
        let ctx = CommandContext::new()?;
        commands::dispatch_command(cli.command, &ctx).await
    })
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "rulepack={0},rulepack_core={0},rulepack_config={0},rulepack_cache={0},rulepack_registry={0}",
            level
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("rulepack encountered an unexpected error: {}", panic_info);
        eprintln!("rulepack crashed! This is a bug.");
        eprintln!("Please report this at: https://github.com/rulepack/rulepack/issues");
        eprintln!("Error: {}", panic_info);
    }));
}
