//! Domain types for callscope.
//!
//! - Call: call records, companies, categories, audio references
//! - Analysis: per-item pipeline state and stage outcomes
//! - Summary: one digest of a company's calls per day

pub mod analysis;
pub mod call;
pub mod summary;

// Re-export commonly used types
pub use analysis::{parse_category_id, AnalysisResult, ItemReport, Stage, StageStatus};
pub use call::{
    AudioRef, CallRecord, CallStats, Category, CategoryId, CompanyId, Employee, EmployeeId,
    NewCallRecord, RecordId, WorkItem,
};
pub use summary::{day_bounds, format_transcriptions_for_summary, DailySummary, SummaryId};
