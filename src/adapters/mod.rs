//! Adapter interfaces for external AI providers.
//!
//! Adapters run a text "action" (a Fabric pattern name, or an instruction
//! for a hosted model) over some input and return the raw output. The
//! analysis stages decide what that output means.

pub mod fabric;
pub mod gemini;
pub mod whisper;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use fabric::FabricAdapter;
pub use gemini::GeminiAdapter;
pub use whisper::WhisperTranscriber;

/// Output from an adapter execution
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    /// The content returned by the adapter
    pub content: String,

    /// Tokens used (if available)
    pub tokens_used: Option<u64>,
}

impl AdapterOutput {
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Trait for text-in, text-out providers
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Run `action` over `input`, giving up after `timeout`
    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput>;
}
