//! callscope - Call recording ingestion and background analysis
//!
//! Recordings are accepted synchronously and analysed asynchronously by a
//! single background worker.
//!
//! # Architecture
//!
//! - Ingestion writes a provisional call record, then enqueues the audio
//!   reference
//! - The worker takes one item at a time: transcribe, detect conflict,
//!   categorize, then one storage update with whatever was produced
//! - A failing or timed-out stage leaves its field empty; the item is
//!   still persisted and the worker moves on
//!
//! # Modules
//!
//! - `ingest`: Work queue and the submit entry point
//! - `core`: The queue-draining worker
//! - `stages`: Transcriber / conflict detector / categorizer seams
//! - `adapters`: External providers (whisper, Fabric, Gemini)
//! - `storage`: Storage gateway over SQLite
//! - `domain`: Call records, categories, per-item analysis state
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! callscope company add "Acme"
//! callscope employee add --company 1 jdoe Jane Doe
//! callscope category add --company 1 Complaint
//! callscope ingest --employee 1 call.wav
//! callscope stats --company 1
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod stages;
pub mod storage;

// Re-export main types at crate root for convenience
pub use core::{Worker, WorkerSummary};
pub use domain::{AnalysisResult, AudioRef, CallRecord, CallStats, Category, ItemReport, WorkItem};
pub use ingest::{work_queue, IngestError, Ingestor, SubmitRequest, WorkQueue, WorkReceiver};
pub use stages::{AnalysisStages, Categorizer, ConflictDetector, StageError, Transcriber};
pub use storage::{SqliteStorage, Storage, StorageError};
