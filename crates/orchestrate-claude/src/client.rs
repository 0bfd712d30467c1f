//! Subprocess-based `Generator` implementation: spawns the configured
//! executable (`ai.command`, default `claude`) with `--agent <agent>`, writes
//! the resolved prompt to its stdin, and waits for it to exit under the
//! request's timeout. The raw stdout is handed back untouched for the
//! Response Parser (C4) to interpret; this crate does not parse output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use orchestrate_core::generator::{AiResponse, Generator, GeneratorRequest};
use orchestrate_core::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Invokes the code-generating assistant as a subprocess.
pub struct ClaudeCliGenerator {
    /// Executable name or path (`ai.command`).
    command: String,
    /// Working directory the generator should run in (the issue's worktree).
    working_dir: Option<String>,
}

impl ClaudeCliGenerator {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), working_dir: None }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Generator for ClaudeCliGenerator {
    async fn invoke(&self, request: GeneratorRequest) -> Result<AiResponse> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--agent").arg(&request.agent);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::external(false, format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| Error::external(true, format!("failed writing prompt to generator stdin: {e}")))?;
        }

        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::external(true, format!("generator timed out after {:?}", request.timeout)))?
            .map_err(|e| Error::external(true, format!("generator process error: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let transient = is_transient_failure(&stderr);
            return Err(Error::external(
                transient,
                format!("{} exited with {:?}: {stderr}", self.command, output.status.code()),
            ));
        }

        Ok(AiResponse {
            success: true,
            summary: String::new(),
            file_changes: Vec::new(),
            commands: Vec::new(),
            raw_output: stdout,
        })
    }
}

fn is_transient_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("timeout") || lower.contains("timed out") || lower.contains("503") || lower.contains("overloaded")
}

#[allow(dead_code)]
fn default_timeout() -> Duration {
    Duration::from_secs(300)
}
