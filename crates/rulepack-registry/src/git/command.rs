//! Thin async wrapper around the system `git` binary

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rulepack_core::error::RulepackError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::RegistryResult;

/// One `git` invocation
///
/// The token, when present, is passed as a per-command
/// `http.extraheader` so the user's global git configuration and
/// credential helpers are never touched.
#[derive(Clone)]
pub struct GitCommand {
    operation: String,
    args: Vec<String>,
    config: Vec<String>,
    cwd: Option<PathBuf>,
    token: Option<String>,
    timeout: Duration,
}

/// Captured result of a finished git process
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Debug for GitCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCommand")
            .field("operation", &self.operation)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GitCommand {
    /// Start a command for a git subcommand, e.g. `GitCommand::new("fetch")`
    pub fn new(subcommand: &str) -> Self {
        Self {
            operation: subcommand.to_string(),
            args: vec![subcommand.to_string()],
            config: Vec::new(),
            cwd: None,
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a `-c key=value` override for this invocation only
    pub fn config(mut self, key: &str, value: &str) -> Self {
        self.config.push(format!("{}={}", key, value));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn token(mut self, token: Option<&str>) -> Self {
        self.token = token.filter(|t| !t.is_empty()).map(str::to_string);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run and return the output regardless of exit status
    pub async fn output(&self) -> RegistryResult<GitOutput> {
        let mut cmd = Command::new("git");
        if let Some(token) = &self.token {
            let basic = BASE64.encode(format!("x-access-token:{}", token));
            cmd.arg("-c")
                .arg(format!("http.extraheader=Authorization: Basic {}", basic));
        }
        for entry in &self.config {
            cmd.arg("-c").arg(entry);
        }
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!("git {}", self.args.join(" "));
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                RulepackError::io(format!("Failed to run git {}", self.operation), e)
            })?,
            Err(_) => {
                return Err(RulepackError::Timeout {
                    operation: format!("git {}", self.operation),
                    seconds: self.timeout.as_secs(),
                })
            },
        };

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: self.redact(String::from_utf8_lossy(&output.stderr).trim()),
        })
    }

    /// Run and return stdout, mapping a non-zero exit to an error
    pub async fn run(&self) -> RegistryResult<String> {
        let output = self.output().await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&self.operation, &output.stderr))
        }
    }

    /// Run and report only whether git exited successfully
    pub async fn succeeds(&self) -> RegistryResult<bool> {
        Ok(self.output().await?.success)
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "<redacted>"),
            None => text.to_string(),
        }
    }
}

/// Map git's stderr onto the error taxonomy
///
/// Unreachable remotes become `ConnectionFailed`; everything else is
/// reported verbatim as a `Git` error.
pub fn classify_failure(operation: &str, stderr: &str) -> RulepackError {
    let lower = stderr.to_lowercase();
    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
    {
        return RulepackError::ConnectionFailed {
            message: format!("git {}: {}", operation, stderr),
            source: None,
        };
    }
    RulepackError::Git {
        operation: operation.to_string(),
        stderr: stderr.to_string(),
    }
}
