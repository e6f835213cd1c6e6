//! Ingest a list of local audio files for one employee.
//!
//! Every file is attempted; a failure is recorded and the next file still
//! goes through, so items already queued are never abandoned halfway.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AudioRef, EmployeeId, RecordId};

use super::submit::{Ingestor, SubmitRequest};

/// Call metadata shared by every file of a batch
#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub employee_id: EmployeeId,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u32,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Source file and the call record created for it
    pub queued: Vec<(PathBuf, RecordId)>,

    /// Source file and why it was not queued
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copy each file into `recordings` and submit it
pub async fn ingest_files(
    ingestor: &Ingestor,
    recordings: &Path,
    files: &[PathBuf],
    meta: &CallMetadata,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for file in files {
        match ingest_file(ingestor, recordings, file, meta).await {
            Ok(record_id) => outcome.queued.push((file.clone(), record_id)),
            Err(reason) => {
                warn!(file = %file.display(), %reason, "File not ingested");
                outcome.failures.push((file.clone(), reason));
            }
        }
    }

    info!(
        queued = outcome.queued.len(),
        failed = outcome.failures.len(),
        "Batch submitted"
    );
    outcome
}

async fn ingest_file(
    ingestor: &Ingestor,
    recordings: &Path,
    file: &Path,
    meta: &CallMetadata,
) -> Result<RecordId, String> {
    if !file.is_file() {
        return Err("not a file".to_string());
    }
    if !ingestor.is_allowed_audio_file(&AudioRef::new(file.to_string_lossy().to_string())) {
        return Err(format!(
            "allowed types are {}",
            ingestor.allowed_extensions().join(", ")
        ));
    }

    let audio_ref = store_recording(recordings, file, meta.employee_id)
        .await
        .map_err(|e| format!("failed to save audio file: {}", e))?;

    ingestor
        .submit(SubmitRequest {
            audio_ref,
            employee_id: meta.employee_id,
            timestamp: meta.timestamp,
            duration_seconds: meta.duration_seconds,
        })
        .await
        .map_err(|e| e.to_string())
}

/// Copy an upload into the recordings directory under a unique name:
/// `{employee}_{uuid}_{upload stem}.{ext}`
pub async fn store_recording(
    recordings: &Path,
    source: &Path,
    employee: EmployeeId,
) -> std::io::Result<AudioRef> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let name = format!("{}_{}_{}.{}", employee, Uuid::new_v4().simple(), stem, ext);
    let target = recordings.join(name);

    tokio::fs::create_dir_all(recordings).await?;
    tokio::fs::copy(source, &target).await?;

    Ok(AudioRef::new(target.to_string_lossy().to_string()))
}
