//! Fabric adapter: runs a Fabric pattern as a subprocess.
//!
//! The transcript goes to stdin, the pattern's answer comes back on stdout.
//! Patterns such as `detect_conflict` or `categorize_call` are expected to
//! live in the user's Fabric custom patterns directory.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Adapter, AdapterOutput};

/// Fabric adapter using subprocess mode
pub struct FabricAdapter {
    /// Path to the fabric binary
    binary_path: String,

    /// Model override passed with `-m`
    model: Option<String>,
}

impl Default for FabricAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricAdapter {
    /// Use `fabric-ai` (Homebrew install name) when present, else `fabric`
    pub fn new() -> Self {
        let binary_path = if std::process::Command::new("fabric-ai")
            .arg("--help")
            .output()
            .is_ok()
        {
            "fabric-ai".to_string()
        } else {
            "fabric".to_string()
        };

        Self {
            binary_path,
            model: None,
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: None,
        }
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    fn command(&self, pattern: &str) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(["-p", pattern]);
        if let Some(model) = &self.model {
            cmd.args(["-m", model]);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Adapter for FabricAdapter {
    fn name(&self) -> &str {
        "fabric"
    }

    async fn execute(&self, action: &str, input: &str, limit: Duration) -> Result<AdapterOutput> {
        let mut child = self
            .command(action)
            .spawn()
            .with_context(|| format!("Failed to spawn fabric for pattern '{}'", action))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write to fabric stdin")?;
            // stdin dropped here: EOF
        }

        let output = timeout(limit, child.wait_with_output())
            .await
            .with_context(|| format!("Fabric pattern '{}' timed out after {:?}", action, limit))?
            .with_context(|| format!("Failed to wait for fabric pattern '{}'", action))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Fabric pattern '{}' exited with {}: {}",
                action,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Fabric output is not valid UTF-8")?;
        Ok(AdapterOutput::new(stdout))
    }
}
