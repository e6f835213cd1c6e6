//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary and reads its JSON output.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::TranscriberSettings;
use crate::domain::AudioRef;
use crate::stages::{StageError, Transcriber};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Transcriber backed by the `whisper` CLI
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    binary: String,
    model: String,
    language: String,
    timeout: Option<Duration>,
}

impl WhisperTranscriber {
    pub fn new(binary: impl Into<String>, model: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            language: language.into(),
            timeout: None,
        }
    }

    /// Binary path: settings, then `WHISPER_PATH`, then `whisper` on PATH
    pub fn from_settings(settings: &TranscriberSettings) -> Self {
        let binary = settings
            .binary
            .clone()
            .or_else(|| std::env::var("WHISPER_PATH").ok())
            .unwrap_or_else(|| "whisper".to_string());

        Self::new(binary, settings.model.clone(), settings.language.clone())
    }

    /// Kill the whisper process if it runs longer than this
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, audio_ref: &AudioRef) -> Result<String> {
        let audio_path = audio_ref.as_path();
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(&self.language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let pending = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .with_context(|| format!("Whisper timed out after {:?}", limit))?,
            None => pending.await,
        }
        .context("Failed to run whisper")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        let transcript = parse_output(&json_content)?;
        tracing::debug!(
            audio_ref = %audio_ref,
            duration_seconds = transcript.1,
            "Whisper transcription finished"
        );

        Ok(transcript.0)
    }
}

/// Text and spoken duration from whisper's JSON
fn parse_output(json: &str) -> Result<(String, f64)> {
    let whisper: WhisperOutput = serde_json::from_str(json).context("Failed to parse whisper JSON")?;
    let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);
    Ok((whisper.text.trim().to_string(), duration))
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio_ref: &AudioRef) -> Result<String, StageError> {
        Ok(self.run(audio_ref).await?)
    }
}
