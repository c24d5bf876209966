//! `rulepack search` and `rulepack info`

use rulepack_core::error::RulepackError;
use rulepack_core::types::{parse, SearchQuery};

use super::CommandContext;
use crate::error::CliResult;

pub async fn search(
    query: String,
    tag: Option<String>,
    target: Option<String>,
    limit: Option<usize>,
    registry: Option<String>,
    ctx: &CommandContext,
) -> CliResult<()> {
    let client = ctx.client(registry.as_deref()).await?;
    let query = SearchQuery {
        query,
        tag,
        target,
        limit,
    };
    let results = client.search(&query).await?;

    if results.is_empty() {
        ctx.output.info("No packages found");
        return Ok(());
    }

    let width = results.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for package in &results {
        ctx.output.line(&format!(
            "{:<width$}  {:<10}  {}",
            package.name,
            package.latest_version.to_string(),
            package.description.as_deref().unwrap_or(""),
            width = width
        ));
    }
    ctx.output
        .info(&format!("{} package(s) in '{}'", results.len(), client.name()));
    Ok(())
}

pub async fn info(
    package: &str,
    version: Option<&str>,
    registry: Option<String>,
    ctx: &CommandContext,
) -> CliResult<()> {
    let client = ctx.client(registry.as_deref()).await?;
    let colors = ctx.output.colors();

    match version {
        Some(raw) => {
            let version = parse(raw).map_err(|e| RulepackError::InvalidFormat {
                what: "version".to_string(),
                input: raw.to_string(),
                reason: e.to_string(),
            })?;
            let info = client.get_version(package, &version).await?;
            ctx.output
                .line(&colors.bold(&format!("{}@{}", info.name, info.version)));
            ctx.output.line(&format!("sha256:  {}", info.sha256));
            ctx.output.line(&format!("size:    {} bytes", info.size_bytes));
            if let Some(published_at) = info.published_at {
                ctx.output
                    .line(&format!("published: {}", published_at.format("%Y-%m-%d %H:%M UTC")));
            }
            ctx.output.line(&format!("files ({}):", info.files.len()));
            for file in &info.files {
                ctx.output.line(&format!("  {}", file));
            }
        },
        None => {
            let info = client.get_package(package).await?;
            ctx.output.line(&colors.bold(&info.name));
            if let Some(description) = &info.description {
                ctx.output.line(description);
            }
            if let Some(latest) = info.latest() {
                ctx.output.line(&format!("latest:   {}", latest));
            }
            let versions: Vec<String> = info.versions.iter().map(|v| v.to_string()).collect();
            ctx.output.line(&format!("versions: {}", versions.join(", ")));
            if !info.tags.is_empty() {
                ctx.output.line(&format!("tags:     {}", info.tags.join(", ")));
            }
            if !info.targets.is_empty() {
                ctx.output.line(&format!("targets:  {}", info.targets.join(", ")));
            }
        },
    }
    Ok(())
}
