//! `rulepack staged`: list archives waiting to be published

use super::CommandContext;
use crate::error::CliResult;

pub async fn execute(ctx: &CommandContext) -> CliResult<()> {
    let staged = ctx.staging().list()?;
    if staged.is_empty() {
        ctx.output.info("Nothing staged");
        return Ok(());
    }

    for archive in &staged {
        let short = archive.sha256.get(..12).unwrap_or(&archive.sha256);
        ctx.output.line(&format!(
            "{}  {}  {} bytes",
            archive.label(),
            short,
            archive.size_bytes
        ));
    }
    ctx.output.info(&format!("{} archive(s) staged", staged.len()));
    Ok(())
}
