//! Core processing logic.
//!
//! This module contains:
//! - Worker: the single consumer of the work queue and the stage pipeline
//! - Summary: per-company daily summaries of analysed calls

pub mod summary;
pub mod worker;

// Re-export commonly used types
pub use summary::{DailySummarizer, SummaryError, SummaryOutcome};
pub use worker::{Worker, WorkerSummary};
