//! Per-item analysis state accumulated by the worker.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::call::{AudioRef, CategoryId};

/// Fields gathered across stages for one work item, flushed in a single
/// storage update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub transcription: Option<String>,
    pub conflict_detected: Option<bool>,
    pub category_id: Option<CategoryId>,
}

impl AnalysisResult {
    /// Text worth analysing further: present and not blank
    pub fn analyzable_text(&self) -> Option<&str> {
        self.transcription
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}

/// The pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcribe,
    DetectConflict,
    Categorize,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::DetectConflict => "detect_conflict",
            Self::Categorize => "categorize",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single stage did for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StageStatus {
    /// Ran to completion (the value may still normalize to nothing)
    Completed,

    /// Did not run (provider disabled, no text, no company, ...)
    Skipped(String),

    /// Ran and failed; the field it owns stays empty
    Failed(String),
}

impl StageStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Outcome of processing one work item
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: Uuid,
    pub audio_ref: AudioRef,
    pub result: AnalysisResult,
    pub stages: BTreeMap<Stage, StageStatus>,
    pub duration_ms: u64,
}

impl ItemReport {
    pub fn new(item_id: Uuid, audio_ref: AudioRef) -> Self {
        Self {
            item_id,
            audio_ref,
            result: AnalysisResult::default(),
            stages: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, stage: Stage, status: StageStatus) {
        self.stages.insert(stage, status);
    }

    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages.get(&stage)
    }

    /// True when the final storage update went through
    pub fn persisted(&self) -> bool {
        self.status(Stage::Persist)
            .map(StageStatus::is_completed)
            .unwrap_or(false)
    }
}

/// Normalize a categorizer's raw answer into a category id.
///
/// Anything that does not parse as an integer, and the value zero, mean
/// "no category". Zero is indistinguishable from a parse failure here, so a
/// real category with id 0 could never be assigned; ids are SQLite rowids,
/// which start at 1. Negative values are treated the same way.
pub fn parse_category_id(raw: &str) -> Option<CategoryId> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    match trimmed.parse::<CategoryId>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_id_normalization() {
        assert_eq!(parse_category_id("3"), Some(3));
        assert_eq!(parse_category_id(" 12\n"), Some(12));
        assert_eq!(parse_category_id("0"), None);
        assert_eq!(parse_category_id("abc"), None);
        assert_eq!(parse_category_id(""), None);
        assert_eq!(parse_category_id("-4"), None);
        assert_eq!(parse_category_id("3.5"), None);
    }

    #[test]
    fn test_parse_category_id_strips_quotes() {
        assert_eq!(parse_category_id("\"7\""), Some(7));
    }

    #[test]
    fn test_analyzable_text_ignores_blank() {
        let mut result = AnalysisResult::default();
        assert_eq!(result.analyzable_text(), None);

        result.transcription = Some("   ".to_string());
        assert_eq!(result.analyzable_text(), None);

        result.transcription = Some("hello".to_string());
        assert_eq!(result.analyzable_text(), Some("hello"));
    }

    #[test]
    fn test_report_persisted_flag() {
        let mut report = ItemReport::new(Uuid::new_v4(), AudioRef::new("a.wav"));
        assert!(!report.persisted());

        report.record(Stage::Persist, StageStatus::Failed("disk full".to_string()));
        assert!(!report.persisted());

        report.record(Stage::Persist, StageStatus::Completed);
        assert!(report.persisted());
    }

    #[test]
    fn test_stage_status_serialization() {
        let json = serde_json::to_string(&StageStatus::skipped("no text")).unwrap();
        assert_eq!(json, r#"{"status":"skipped","reason":"no text"}"#);
    }
}
