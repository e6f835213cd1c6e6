//! Background worker that drains the work queue.
//!
//! One item at a time, stages in order:
//!
//! 1. transcribe
//! 2. detect conflict (needs non-empty text)
//! 3. categorize (needs non-empty text and a resolvable company)
//! 4. persist, always, exactly once
//!
//! A failing, timed-out or panicking stage leaves its field empty and the
//! next stage runs anyway. Nothing is retried or requeued.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineSettings;
use crate::domain::{parse_category_id, ItemReport, Stage, StageStatus, WorkItem};
use crate::ingest::WorkReceiver;
use crate::stages::{AnalysisStages, Categorizer, StageError};
use crate::storage::Storage;

/// Counters reported when the worker loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Items taken off the queue
    pub processed: usize,

    /// Items whose final storage update succeeded
    pub persisted: usize,

    /// Items whose processing task died outside any stage
    pub crashed: usize,
}

/// The single queue consumer
#[derive(Clone)]
pub struct Worker {
    storage: Arc<dyn Storage>,
    stages: AnalysisStages,
    stage_timeout: Duration,
}

impl Worker {
    pub fn new(storage: Arc<dyn Storage>, stages: AnalysisStages) -> Self {
        Self {
            storage,
            stages,
            stage_timeout: PipelineSettings::default().stage_timeout(),
        }
    }

    /// Upper bound for each provider call and storage lookup inside a stage
    pub fn with_stage_timeout(mut self, stage_timeout: Duration) -> Self {
        self.stage_timeout = stage_timeout;
        self
    }

    /// Run the loop on its own task
    pub fn spawn(self, receiver: WorkReceiver) -> JoinHandle<WorkerSummary> {
        tokio::spawn(self.run(receiver))
    }

    /// Drain the queue until every producer is gone.
    ///
    /// Each item runs on a spawned task that is awaited before the next
    /// dequeue, so items never overlap. Provider panics are caught at the
    /// stage boundary; the task join only catches what escapes that.
    pub async fn run(self, mut receiver: WorkReceiver) -> WorkerSummary {
        info!(stages = ?self.stages.describe(), "Audio processing worker started");
        let mut summary = WorkerSummary::default();

        while let Some(item) = receiver.dequeue().await {
            summary.processed += 1;
            let audio_ref = item.audio_ref.clone();
            let item_id = item.id;

            let worker = self.clone();
            let task = tokio::spawn(async move { worker.process_item(&item).await });

            match task.await {
                Ok(report) => {
                    if report.persisted() {
                        summary.persisted += 1;
                    }
                    debug!(%item_id, queue_depth = receiver.depth(), "Task done");
                }
                Err(e) => {
                    summary.crashed += 1;
                    error!(
                        %item_id,
                        audio_ref = %audio_ref,
                        error = %e,
                        "Unhandled error processing audio; moving to next item"
                    );
                }
            }
        }

        info!(
            processed = summary.processed,
            persisted = summary.persisted,
            crashed = summary.crashed,
            "Audio processing worker stopped"
        );
        summary
    }

    /// Run every stage for one item and persist whatever was produced
    #[instrument(skip(self, item), fields(item_id = %item.id, audio_ref = %item.audio_ref))]
    pub async fn process_item(&self, item: &WorkItem) -> ItemReport {
        let started = Instant::now();
        let mut report = ItemReport::new(item.id, item.audio_ref.clone());
        info!("Processing audio file");

        self.transcribe(&mut report).await;

        match report.result.analyzable_text().map(str::to_string) {
            Some(text) => {
                self.detect_conflict(&text, &mut report).await;
                self.categorize(&text, &mut report).await;
            }
            None => {
                let reason = match &report.result.transcription {
                    Some(_) => "no speech content",
                    None => "no transcription",
                };
                info!(reason, "Skipping conflict detection and categorization");
                report.record(Stage::DetectConflict, StageStatus::skipped(reason));
                report.record(Stage::Categorize, StageStatus::skipped(reason));
            }
        }

        self.persist(&mut report).await;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(duration_ms = report.duration_ms, "Finished audio file");
        report
    }

    async fn transcribe(&self, report: &mut ItemReport) {
        let Some(transcriber) = &self.stages.transcriber else {
            warn!("Speech recognition not available");
            report.record(Stage::Transcribe, StageStatus::skipped("transcriber not configured"));
            return;
        };

        let outcome = self
            .bounded(Stage::Transcribe, transcriber.transcribe(&report.audio_ref))
            .await;

        match outcome {
            Ok(text) => {
                let text = text.trim().to_string();
                debug!(chars = text.len(), "Transcription finished");
                report.result.transcription = Some(text);
                report.record(Stage::Transcribe, StageStatus::Completed);
            }
            Err(e) => {
                error!(stage = %Stage::Transcribe, error = %e, "Transcription error");
                report.record(Stage::Transcribe, StageStatus::Failed(e.to_string()));
            }
        }
    }

    async fn detect_conflict(&self, text: &str, report: &mut ItemReport) {
        let Some(detector) = &self.stages.conflict_detector else {
            report.record(Stage::DetectConflict, StageStatus::skipped("detector not configured"));
            return;
        };

        match self.bounded(Stage::DetectConflict, detector.detect(text)).await {
            Ok(conflict) => {
                info!(conflict, "Conflict detection result");
                report.result.conflict_detected = Some(conflict);
                report.record(Stage::DetectConflict, StageStatus::Completed);
            }
            Err(e) => {
                error!(stage = %Stage::DetectConflict, error = %e, "Conflict detection error");
                report.record(Stage::DetectConflict, StageStatus::Failed(e.to_string()));
            }
        }
    }

    async fn categorize(&self, text: &str, report: &mut ItemReport) {
        let Some(categorizer) = &self.stages.categorizer else {
            report.record(Stage::Categorize, StageStatus::skipped("categorizer not configured"));
            return;
        };

        let status = match self.try_categorize(categorizer.as_ref(), text, report).await {
            Ok(status) => status,
            Err(e) => {
                error!(stage = %Stage::Categorize, error = %e, "Categorization error");
                StageStatus::Failed(e.to_string())
            }
        };
        report.record(Stage::Categorize, status);
    }

    async fn try_categorize(
        &self,
        categorizer: &dyn Categorizer,
        text: &str,
        report: &mut ItemReport,
    ) -> Result<StageStatus, StageError> {
        let company = self
            .bounded(
                Stage::Categorize,
                self.storage.resolve_company_for_audio(&report.audio_ref),
            )
            .await?;

        let Some(company_id) = company else {
            warn!("Company could not be resolved; skipping categorization");
            return Ok(StageStatus::skipped("company not resolved"));
        };

        let categories = self
            .bounded(Stage::Categorize, self.storage.list_categories(company_id))
            .await?;

        if categories.is_empty() {
            debug!(company_id, "Company has no categories");
            return Ok(StageStatus::skipped("company has no categories"));
        }

        let raw = self
            .bounded(Stage::Categorize, categorizer.categorize(&categories, text))
            .await?;

        match parse_category_id(&raw) {
            Some(id) if categories.iter().any(|c| c.id == id) => {
                info!(category_id = id, "Categorization result");
                report.result.category_id = Some(id);
            }
            Some(id) => {
                warn!(category_id = id, company_id, "Categorizer picked an unknown category");
            }
            None => {
                debug!(raw = %raw.trim(), "Categorizer answer normalized to no category");
            }
        }

        Ok(StageStatus::Completed)
    }

    async fn persist(&self, report: &mut ItemReport) {
        let outcome = self
            .guarded(
                Stage::Persist,
                self.storage.update_analysis(&report.audio_ref, &report.result),
            )
            .await;

        match outcome {
            Ok(()) => {
                info!("Database updated for audio file");
                report.record(Stage::Persist, StageStatus::Completed);
            }
            Err(e) => {
                error!(stage = %Stage::Persist, error = %e, "Failed to persist analysis");
                report.record(Stage::Persist, StageStatus::Failed(e.to_string()));
            }
        }
    }

    /// Apply the stage timeout on top of [`guarded`](Self::guarded)
    async fn bounded<T, E, F>(&self, stage: Stage, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        match tokio::time::timeout(self.stage_timeout, self.guarded(stage, fut)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                stage,
                after: self.stage_timeout,
            }),
        }
    }

    /// Turn a panic inside `fut` into [`StageError::Panicked`] and fold the
    /// error into [`StageError`]
    async fn guarded<T, E, F>(&self, stage: Stage, fut: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result.map_err(Into::into),
            Err(payload) => Err(StageError::Panicked {
                stage,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
