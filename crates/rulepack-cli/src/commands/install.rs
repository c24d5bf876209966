//! `rulepack install` and `rulepack uninstall`
//!
//! Install reconciles `rulepack.json` against `rulepack.lock`, then fetches
//! and extracts every package that is missing or behind. Packages live in
//! `.rulepack/<name>` under the project. A failed package never stops the
//! rest of the run; the lockfile only ever records packages that were fully
//! extracted.

use rulepack_cache::extract_archive_file;
use rulepack_config::{ManifestStore, PlannedAction, ReconcileAction};
use rulepack_core::error::{RulepackError, RulepackResult};
use rulepack_core::types::Version;
use rulepack_core::utils::verify_file_integrity;
use rulepack_registry::RegistryClient;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, warn};

use super::CommandContext;
use crate::error::{CliError, CliResult};

/// Directory under the project that holds installed packages
pub const INSTALL_DIR: &str = ".rulepack";

/// Execute the `rulepack install` command
pub async fn execute(registry: Option<String>, ctx: &CommandContext) -> CliResult<()> {
    let start_time = Instant::now();
    let mut store = ManifestStore::open(&ctx.cwd)?;
    let plan = store.plan();

    if plan.is_empty() {
        ctx.output.info("No dependencies declared");
        return Ok(());
    }

    let pending = plan.iter().filter(|p| p.action.needs_fetch()).count();
    let client = if pending > 0 {
        Some(ctx.client(registry.as_deref()).await?)
    } else {
        None
    };

    ctx.output.step(
        "📦",
        &format!("Installing dependencies ({} to fetch)", pending),
    );

    let mut failed = 0;
    for planned in &plan {
        match &planned.action {
            ReconcileAction::SkipCurrent => {
                ctx.output
                    .info(&format!("{}@{} is up to date", planned.name, planned.desired));
            },
            ReconcileAction::SkipNewer => {
                ctx.output.info(&format!(
                    "{} keeps {} (newer than {})",
                    planned.name,
                    planned.installed.as_deref().unwrap_or("?"),
                    planned.desired
                ));
            },
            ReconcileAction::Invalid(reason) => {
                failed += 1;
                ctx.output.error(&format!("{}: {}", planned.name, reason));
            },
            ReconcileAction::Install | ReconcileAction::Update => {
                let Some(client) = client.as_deref() else {
                    continue;
                };
                match install_one(client, &mut store, planned, ctx).await {
                    Ok(version) => ctx.output.success(&format!(
                        "{} {}@{}",
                        if planned.action == ReconcileAction::Update {
                            "Updated"
                        } else {
                            "Installed"
                        },
                        planned.name,
                        version
                    )),
                    Err(e) => {
                        failed += 1;
                        ctx.output.error(&format!("{}: {}", planned.name, e));
                    },
                }
            },
        }
    }

    if failed > 0 {
        return Err(CliError::Partial {
            what: "packages",
            failed,
            total: plan.len(),
        });
    }

    ctx.output.success(&format!(
        "Dependencies installed in {:.2}s",
        start_time.elapsed().as_secs_f64()
    ));
    Ok(())
}

/// Fetch, verify, extract and record one package
pub(crate) async fn install_one(
    client: &dyn RegistryClient,
    store: &mut ManifestStore,
    planned: &PlannedAction,
    ctx: &CommandContext,
) -> RulepackResult<Version> {
    let version = planned
        .desired_version()
        .ok_or_else(|| RulepackError::InvalidFormat {
            what: "version".to_string(),
            input: planned.desired.clone(),
            reason: "not a semantic version".to_string(),
        })?;

    let info = client.get_version(&planned.name, &version).await?;
    debug!("{}@{} has sha256 {}", info.name, info.version, info.sha256);

    let downloads = ctx.home.join("downloads");
    fs::create_dir_all(&downloads)
        .await
        .map_err(|e| RulepackError::io(format!("Failed to create {}", downloads.display()), e))?;
    let archive = downloads.join(format!("{}.tgz", info.sha256));
    if archive.exists() {
        if let Err(e) = verify_file_integrity(&archive, &info.sha256) {
            warn!("Discarding cached download: {}", e);
            fs::remove_file(&archive)
                .await
                .map_err(|e| RulepackError::io(format!("Failed to remove {}", archive.display()), e))?;
        }
    }
    if !archive.exists() {
        client.download_blob(&info.sha256, &archive).await?;
    }

    let relative = install_path(&planned.name);
    let target = ctx.cwd.join(&relative);
    replace_dir(&archive, &target).await?;

    store.record_install(
        &planned.name,
        &info.version,
        &info.sha256,
        &relative,
        client.name(),
    )?;
    Ok(info.version)
}

/// `.rulepack/<name>`, relative to the project root
fn install_path(name: &str) -> PathBuf {
    Path::new(INSTALL_DIR).join(name)
}

/// Extract into a sibling directory and swap it over `target`
async fn replace_dir(archive: &Path, target: &Path) -> RulepackResult<()> {
    let parent = target.parent().unwrap_or(target);
    fs::create_dir_all(parent)
        .await
        .map_err(|e| RulepackError::io(format!("Failed to create {}", parent.display()), e))?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.partial", name));
    if staging.exists() {
        remove_dir(&staging).await?;
    }

    if let Err(e) = extract_archive_file(archive, &staging) {
        if let Err(cleanup) = remove_dir(&staging).await {
            warn!("Failed to clean up {}: {}", staging.display(), cleanup);
        }
        return Err(e);
    }

    if target.exists() {
        remove_dir(target).await?;
    }
    fs::rename(&staging, target)
        .await
        .map_err(|e| RulepackError::io(format!("Failed to move package into {}", target.display()), e))
}

async fn remove_dir(dir: &Path) -> RulepackResult<()> {
    fs::remove_dir_all(dir)
        .await
        .map_err(|e| RulepackError::io(format!("Failed to remove {}", dir.display()), e))
}

/// Execute the `rulepack uninstall` command
pub async fn uninstall(package: &str, ctx: &CommandContext) -> CliResult<()> {
    let mut store = ManifestStore::open(&ctx.cwd)?;
    let declared = store.manifest().dependencies.contains_key(package);
    if store.installed(package).is_none() && !declared {
        return Err(RulepackError::not_found(format!("dependency '{}'", package)).into());
    }
    let removed = store.remove(package)?;

    let dir = match &removed {
        Some(locked) => ctx.cwd.join(&locked.install_path),
        None => ctx.cwd.join(install_path(package)),
    };
    if dir.exists() {
        remove_dir(&dir).await?;
    }

    ctx.output.success(&format!("Removed {}", package));
    Ok(())
}
