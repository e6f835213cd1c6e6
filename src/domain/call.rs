//! Call records and the organisational entities they hang off.
//!
//! A call record is created the moment an upload is accepted, with every
//! analysis field empty. The worker later fills those fields in place,
//! matching the record by its audio reference.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RecordId = i64;
pub type EmployeeId = i64;
pub type CompanyId = i64;
pub type CategoryId = i64;

/// Stable reference to a stored audio file (its path on disk).
///
/// This is the join key between the queue and the `call_records` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Lowercased file extension, if the reference has one
    pub fn extension(&self) -> Option<String> {
        self.as_path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// File name only, used when records are shown to people
    pub fn file_name(&self) -> String {
        self.as_path()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.0.clone())
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AudioRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AudioRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One audio file waiting for analysis.
///
/// The owning call record is not carried here; storage resolves it from
/// the audio reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Correlation id for logs
    pub id: Uuid,

    /// Audio file to analyse
    pub audio_ref: AudioRef,

    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(audio_ref: AudioRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            audio_ref,
            enqueued_at: Utc::now(),
        }
    }
}

/// Metadata for a provisional call record (all analysis fields start empty)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCallRecord {
    pub employee_id: EmployeeId,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u32,
    pub audio_ref: AudioRef,
}

/// A persisted call record as read back from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: RecordId,
    pub employee_id: EmployeeId,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u32,
    pub audio_ref: AudioRef,

    /// `None` until the worker has processed the record (or transcription failed)
    pub transcription: Option<String>,

    pub conflict_detected: Option<bool>,

    pub category_id: Option<CategoryId>,

    /// Display name of the employee, filled by listing queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
}

impl CallRecord {
    /// True once any analysis field has been written
    pub fn is_analyzed(&self) -> bool {
        self.transcription.is_some() || self.conflict_detected.is_some() || self.category_id.is_some()
    }
}

/// An employee of a company; owner of the calls they record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub company_id: CompanyId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// A company-defined call category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Category {
    pub fn new(id: CategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Aggregate figures over a set of call records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallStats {
    pub total_calls: usize,
    pub total_duration_seconds: u64,
    pub conflict_percentage: f64,
}

impl CallStats {
    pub fn from_records(records: &[CallRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let total_duration_seconds = records.iter().map(|r| r.duration_seconds as u64).sum();
        let conflicts = records
            .iter()
            .filter(|r| r.conflict_detected == Some(true))
            .count();

        Self {
            total_calls: records.len(),
            total_duration_seconds,
            conflict_percentage: conflicts as f64 / records.len() as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(duration: u32, conflict: Option<bool>) -> CallRecord {
        CallRecord {
            id: 1,
            employee_id: 1,
            timestamp: Utc::now(),
            duration_seconds: duration,
            audio_ref: AudioRef::new("a.wav"),
            transcription: None,
            conflict_detected: conflict,
            category_id: None,
            employee_name: None,
        }
    }

    #[test]
    fn test_audio_ref_extension_is_lowercased() {
        assert_eq!(AudioRef::new("rec/Call.WAV").extension(), Some("wav".to_string()));
        assert_eq!(AudioRef::new("noext").extension(), None);
    }

    #[test]
    fn test_audio_ref_file_name() {
        assert_eq!(AudioRef::new("/var/rec/emp42_abc.wav").file_name(), "emp42_abc.wav");
    }

    #[test]
    fn test_stats_empty() {
        let stats = CallStats::from_records(&[]);
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.conflict_percentage, 0.0);
    }

    #[test]
    fn test_stats_counts_only_confirmed_conflicts() {
        let records = vec![
            record(30, Some(true)),
            record(60, Some(false)),
            record(10, None),
            record(20, Some(true)),
        ];

        let stats = CallStats::from_records(&records);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.total_duration_seconds, 120);
        assert_eq!(stats.conflict_percentage, 50.0);
    }

    #[test]
    fn test_provisional_record_is_not_analyzed() {
        assert!(!record(5, None).is_analyzed());
        assert!(record(5, Some(false)).is_analyzed());
    }
}
