//! Errors surfaced by the `rulepack` binary

use rulepack_core::error::RulepackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Rulepack(#[from] RulepackError),

    /// Some items of a batch failed; each was already reported
    #[error("{failed} of {total} {what} failed")]
    Partial {
        what: &'static str,
        failed: usize,
        total: usize,
    },
}

pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Rulepack(e) => e.suggestion(),
            CliError::Partial { .. } => Some("Fix the failures above and run the command again"),
        }
    }
}
