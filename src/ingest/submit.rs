//! Ingestion entry point: the producer side of the work queue.
//!
//! `submit` stores the provisional record first and only then enqueues the
//! audio reference. The worker's final update matches on the audio
//! reference, so an item that overtook its record would update nothing.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::DEFAULT_AUDIO_EXTENSIONS;
use crate::domain::{AudioRef, EmployeeId, NewCallRecord, RecordId, WorkItem};
use crate::storage::{Storage, StorageError};

use super::queue::{QueueError, WorkQueue};

/// Errors returned synchronously to the caller; processing never starts
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Audio reference is empty")]
    EmptyAudioRef,

    #[error("Invalid audio file type for {audio_ref}. Allowed types: {allowed}")]
    UnsupportedFormat { audio_ref: String, allowed: String },

    #[error("Invalid employee id: {0}")]
    InvalidEmployee(EmployeeId),

    #[error("Invalid call timestamp '{0}'. Use ISO 8601.")]
    InvalidTimestamp(String),

    #[error("Failed to save call record: {0}")]
    Storage(#[from] StorageError),

    #[error("Call record {record_id} stored but not queued: {source}")]
    QueueClosed {
        record_id: RecordId,
        #[source]
        source: QueueError,
    },
}

/// One uploaded recording and its call metadata
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub audio_ref: AudioRef,
    pub employee_id: EmployeeId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: u32,
}

/// Validates uploads, writes provisional records and feeds the queue
#[derive(Clone)]
pub struct Ingestor {
    storage: Arc<dyn Storage>,
    queue: WorkQueue,
    allowed_extensions: Vec<String>,
}

impl Ingestor {
    pub fn new(storage: Arc<dyn Storage>, queue: WorkQueue) -> Self {
        Self {
            storage,
            queue,
            allowed_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replace the accepted audio extensions (lowercase, no dot)
    pub fn with_allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = extensions;
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Reject requests that must never reach storage
    pub fn validate(&self, request: &SubmitRequest) -> Result<(), IngestError> {
        if request.audio_ref.as_str().trim().is_empty() {
            return Err(IngestError::EmptyAudioRef);
        }

        if !self.is_allowed_audio_file(&request.audio_ref) {
            return Err(IngestError::UnsupportedFormat {
                audio_ref: request.audio_ref.to_string(),
                allowed: self.allowed_extensions.join(", "),
            });
        }

        if request.employee_id <= 0 {
            return Err(IngestError::InvalidEmployee(request.employee_id));
        }

        Ok(())
    }

    pub fn is_allowed_audio_file(&self, audio_ref: &AudioRef) -> bool {
        audio_ref
            .extension()
            .map(|ext| self.allowed_extensions.iter().any(|allowed| *allowed == ext))
            .unwrap_or(false)
    }

    /// Store a provisional record, then queue the recording for analysis.
    ///
    /// Returns once the item is queued; analysis happens afterwards.
    pub async fn submit(&self, request: SubmitRequest) -> Result<RecordId, IngestError> {
        self.validate(&request)?;

        let record_id = self
            .storage
            .create_provisional_record(NewCallRecord {
                employee_id: request.employee_id,
                timestamp: request.timestamp,
                duration_seconds: request.duration_seconds,
                audio_ref: request.audio_ref.clone(),
            })
            .await?;

        self.queue
            .enqueue(WorkItem::new(request.audio_ref.clone()))
            .map_err(|source| IngestError::QueueClosed { record_id, source })?;

        info!(
            record_id,
            audio_ref = %request.audio_ref,
            queue_depth = self.queue.depth(),
            "Enqueued recording for background processing"
        );

        Ok(record_id)
    }
}

/// Parse an ISO 8601 call timestamp.
///
/// Accepts RFC 3339 (`Z` or an offset) and naive `YYYY-MM-DD[T ]HH:MM:SS`,
/// which is taken as UTC.
pub fn parse_call_timestamp(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    let trimmed = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| IngestError::InvalidTimestamp(raw.to_string()))
}
