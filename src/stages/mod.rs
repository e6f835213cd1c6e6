//! Analysis stages run by the worker.
//!
//! Each stage is a capability that is either present or absent. Absence is
//! decided once, when [`AnalysisStages`] is built; the worker only checks
//! the `Option` at stage entry.
//!
//! ```text
//! audio ─▶ Transcriber ─▶ text ─┬─▶ ConflictDetector ─▶ bool
//!                               └─▶ Categorizer ─▶ raw id
//! ```

pub mod categorize;
pub mod conflict;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::adapters::{Adapter, FabricAdapter, GeminiAdapter, WhisperTranscriber};
use crate::config::{AnalyzerSettings, ProviderKind, ResolvedConfig};
use crate::domain::{AudioRef, Category, Stage};
use crate::storage::StorageError;

pub use categorize::AdapterCategorizer;
pub use conflict::AdapterConflictDetector;

/// Why a stage produced no result
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("{stage} panicked: {message}")]
    Panicked { stage: Stage, message: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unrecognised provider output: {0}")]
    Malformed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }
}

/// Speech-to-text. An empty string means the recording had no speech.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio_ref: &AudioRef) -> Result<String, StageError>;
}

/// Decides whether a transcript contains conflict
#[async_trait]
pub trait ConflictDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, text: &str) -> Result<bool, StageError>;
}

/// Picks a category for a transcript.
///
/// Returns the provider's raw answer; callers normalize it with
/// [`parse_category_id`](crate::domain::parse_category_id).
#[async_trait]
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &str;

    async fn categorize(&self, categories: &[Category], text: &str) -> Result<String, StageError>;
}

/// The configured set of stages
#[derive(Clone, Default)]
pub struct AnalysisStages {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub conflict_detector: Option<Arc<dyn ConflictDetector>>,
    pub categorizer: Option<Arc<dyn Categorizer>>,
}

impl AnalysisStages {
    /// No stages at all; items are still persisted as processed
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_conflict_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.conflict_detector = Some(detector);
        self
    }

    pub fn with_categorizer(mut self, categorizer: Arc<dyn Categorizer>) -> Self {
        self.categorizer = Some(categorizer);
        self
    }

    /// Build every provider the configuration enables.
    ///
    /// A provider that is disabled or cannot be built (missing API key, ...)
    /// is left out with a warning; it never fails startup.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let timeout = config.pipeline.stage_timeout();
        let mut stages = Self::none();

        if config.transcriber.enabled {
            let whisper = WhisperTranscriber::from_settings(&config.transcriber).with_timeout(timeout);
            stages.transcriber = Some(Arc::new(whisper));
        } else {
            warn!("Transcriber disabled; recordings will be stored without transcription");
        }

        match build_adapter(&config.conflict) {
            Ok(Some(adapter)) => {
                let action = config
                    .conflict
                    .action
                    .clone()
                    .unwrap_or_else(|| conflict::default_action(config.conflict.provider).to_string());
                stages.conflict_detector =
                    Some(Arc::new(AdapterConflictDetector::new(adapter, action, timeout)));
            }
            Ok(None) => warn!("Conflict detection disabled"),
            Err(e) => warn!(error = %e, "Conflict detection unavailable"),
        }

        match build_adapter(&config.categorizer) {
            Ok(Some(adapter)) => {
                let action = config
                    .categorizer
                    .action
                    .clone()
                    .unwrap_or_else(|| categorize::default_action(config.categorizer.provider).to_string());
                stages.categorizer = Some(Arc::new(AdapterCategorizer::new(adapter, action, timeout)));
            }
            Ok(None) => warn!("Categorization disabled"),
            Err(e) => warn!(error = %e, "Categorization unavailable"),
        }

        stages
    }

    /// Names of the active stages, for startup logging
    pub fn describe(&self) -> Vec<String> {
        let mut active = Vec::new();
        if let Some(t) = &self.transcriber {
            active.push(format!("transcribe:{}", t.name()));
        }
        if let Some(d) = &self.conflict_detector {
            active.push(format!("detect_conflict:{}", d.name()));
        }
        if let Some(c) = &self.categorizer {
            active.push(format!("categorize:{}", c.name()));
        }
        active
    }
}

/// Adapter for one provider setting; `None` when the provider is disabled
pub(crate) fn build_adapter(settings: &AnalyzerSettings) -> anyhow::Result<Option<Arc<dyn Adapter>>> {
    match settings.provider {
        ProviderKind::Disabled => Ok(None),
        ProviderKind::Gemini => {
            let model = settings
                .model
                .clone()
                .unwrap_or_else(|| crate::adapters::gemini::DEFAULT_MODEL.to_string());
            let adapter = GeminiAdapter::from_env(&settings.api_key_env, model)?;
            Ok(Some(Arc::new(adapter)))
        }
        ProviderKind::Fabric => {
            let adapter = match &settings.fabric_binary {
                Some(path) => FabricAdapter::with_binary_path(path.clone()),
                None => FabricAdapter::new(),
            };
            Ok(Some(Arc::new(adapter.model(settings.model.clone()))))
        }
    }
}
