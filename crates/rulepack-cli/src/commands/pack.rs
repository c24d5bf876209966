//! `rulepack pack`: stage a new archive

use rulepack_cache::{ArchiveBuilder, PackRequest, PreviousVersion};
use rulepack_config::{load_manifest, Lockfile, LOCKFILE_NAME};
use rulepack_core::error::{RulepackError, RulepackResult};
use rulepack_core::types::MANIFEST_FILE_NAME;
use std::collections::BTreeSet;
use tracing::debug;

use super::CommandContext;
use crate::error::CliResult;
use crate::PackArgs;

pub async fn execute(args: PackArgs, ctx: &CommandContext) -> CliResult<()> {
    let name = match args.name {
        Some(name) => name,
        None => project_name(ctx)?,
    };
    let previous = previous_version(ctx, &name)?;
    if let Some(previous) = &previous {
        ctx.output.info(&format!(
            "Found installed {}@{} ({} files)",
            name,
            previous.version,
            previous.files.len()
        ));
    }

    let request = PackRequest {
        name,
        explicit_version: args.version,
        base_dir: ctx.cwd.clone(),
        files: args.files,
        replace: args.replace.into_iter().collect::<BTreeSet<_>>(),
        description: args.description,
        tags: args.tags,
        targets: args.targets,
        license: args.license,
    };

    let builder = ArchiveBuilder::new(ctx.staging());
    let staged = builder.pack(&request, previous.as_ref())?;

    ctx.output.success(&format!(
        "Staged {} ({} files, {} bytes)",
        staged.label(),
        staged.file_paths.len(),
        staged.size_bytes
    ));
    ctx.output.info(&format!("  sha256 {}", staged.sha256));
    ctx.output.info(&format!("  {}", staged.archive_path.display()));
    Ok(())
}

fn project_name(ctx: &CommandContext) -> RulepackResult<String> {
    if !ctx.cwd.join(MANIFEST_FILE_NAME).exists() {
        return Err(RulepackError::ConfigValidation {
            field: "name".to_string(),
            reason: format!("pass --name or run inside a directory with {}", MANIFEST_FILE_NAME),
        });
    }
    Ok(load_manifest(&ctx.cwd)?.name)
}

/// The installed copy of `name` recorded in this project's lockfile
fn previous_version(ctx: &CommandContext, name: &str) -> RulepackResult<Option<PreviousVersion>> {
    if !ctx.cwd.join(LOCKFILE_NAME).exists() {
        return Ok(None);
    }
    let lockfile = Lockfile::load_or_default(&ctx.cwd)?;
    let Some(locked) = lockfile.get(name) else {
        return Ok(None);
    };

    let dir = ctx.cwd.join(&locked.install_path);
    if !dir.join(MANIFEST_FILE_NAME).exists() {
        debug!("Lockfile lists {} but {} is missing", name, dir.display());
        return Ok(None);
    }
    PreviousVersion::from_installed(&dir).map(Some)
}
