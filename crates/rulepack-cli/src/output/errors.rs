//! Error message formatting with actionable suggestions.

use super::colors::ColorSupport;
use crate::error::CliError;
use std::error::Error;

/// Error formatter with suggestions
pub struct ErrorFormatter {
    colors: ColorSupport,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self {
            colors: ColorSupport::detect(),
        }
    }

    pub fn with_colors(colors: ColorSupport) -> Self {
        Self { colors }
    }

    /// Format an error with its suggestion and source chain
    pub fn format_error(&self, error: &CliError) -> String {
        let mut output = String::new();

        output.push_str(&self.colors.red("error"));
        output.push_str(": ");
        output.push_str(&error.to_string());
        output.push('\n');

        if let Some(suggestion) = error.suggestion() {
            output.push('\n');
            output.push_str(&self.colors.dim("help"));
            output.push_str(": ");
            output.push_str(suggestion);
            output.push('\n');
        }

        // `Rulepack` is transparent, so start from the inner error's source
        let mut source = match error {
            CliError::Rulepack(inner) => inner.source(),
            other => other.source(),
        };
        while let Some(err) = source {
            output.push('\n');
            output.push_str(&self.colors.dim("caused by"));
            output.push_str(": ");
            output.push_str(&err.to_string());
            source = err.source();
        }

        output
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulepack_core::error::RulepackError;

    #[test]
    fn test_format_includes_suggestion() {
        let formatter = ErrorFormatter::with_colors(ColorSupport::disabled());
        let error = CliError::from(RulepackError::Conflict {
            package: "alpha".to_string(),
            version: "1.0.0".to_string(),
            registry: "team".to_string(),
        });
        let text = formatter.format_error(&error);
        assert!(text.starts_with("error: "));
        assert!(text.contains("help: This version is already published"));
    }

    #[test]
    fn test_format_source_chain() {
        let formatter = ErrorFormatter::with_colors(ColorSupport::disabled());
        let error = CliError::from(RulepackError::io(
            "Failed to read rulepack.json".to_string(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ));
        let text = formatter.format_error(&error);
        assert!(text.contains("caused by: no such file"));
    }
}
