//! Gemini adapter for hosted text classification.
//!
//! Endpoint: POST {base}/models/{model}:generateContent
//! Auth: `x-goog-api-key` header

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Adapter, AdapterOutput};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini generateContent client
pub struct GeminiAdapter {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

impl GeminiAdapter {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Read the API key from the named environment variable
    pub fn from_env(api_key_env: &str, model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .with_context(|| format!("{} environment variable required", api_key_env))?;
        Ok(Self::new(api_key, model))
    }

    /// Point at a different host (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: action }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: input }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.as_str())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .context("Failed to reach Gemini")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini error ({}): {}", status, text.trim());
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let content = extract_text(&body)
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))?;

        Ok(AdapterOutput {
            content,
            tokens_used: body.usage_metadata.and_then(|u| u.total_token_count),
        })
    }
}

fn extract_text(body: &GenerateResponse) -> Option<String> {
    let content = body.candidates.first()?.content.as_ref()?;
    let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
    Some(text)
}
