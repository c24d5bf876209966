//! `rulepack publish`: push staged archives to a registry

use rulepack_registry::{PublishOptions, PublishOrchestrator};

use super::CommandContext;
use crate::error::{CliError, CliResult};

pub async fn execute(
    package: Option<String>,
    registry: Option<String>,
    dry_run: bool,
    ctx: &CommandContext,
) -> CliResult<()> {
    let client = ctx.client(registry.as_deref()).await?;
    let staging = ctx.staging();
    let orchestrator = PublishOrchestrator::new(client.as_ref(), &staging);

    let report = orchestrator
        .run(&PublishOptions { package, dry_run })
        .await?;

    if report.planned.is_empty() {
        ctx.output.info("Nothing staged to publish");
        return Ok(());
    }

    if report.dry_run {
        ctx.output.step(
            "🔍",
            &format!(
                "Would publish {} archive(s) to '{}':",
                report.planned.len(),
                client.name()
            ),
        );
        for archive in &report.planned {
            ctx.output
                .line(&format!("  {} ({} bytes)", archive.label(), archive.size_bytes));
        }
        return Ok(());
    }

    for outcome in &report.outcomes {
        let label = outcome.archive.label();
        match &outcome.result {
            Ok(result) if result.degraded => {
                ctx.output.warn(&format!("{}: {}", label, result.message));
                ctx.output.line(&format!("  {}", result.locator));
            },
            Ok(result) => {
                ctx.output.success(&format!("Published {}", label));
                ctx.output.line(&format!("  {}", result.locator));
            },
            Err(e) => ctx.output.error(&format!("{}: {}", label, e)),
        }
    }

    let failed = report.failed().count();
    if failed > 0 {
        return Err(CliError::Partial {
            what: "publishes",
            failed,
            total: report.outcomes.len(),
        });
    }
    Ok(())
}
