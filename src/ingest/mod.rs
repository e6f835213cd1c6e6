//! Call recording ingestion.
//!
//! Request handlers call [`Ingestor::submit`]; it stores a provisional call
//! record and hands the audio reference to the worker through the queue.
//!
//! # Architecture
//!
//! ```text
//! handler ─┐
//! handler ─┼─▶ Ingestor ─▶ storage (provisional record)
//! handler ─┘       │
//!                  └─▶ WorkQueue ─▶ Worker
//! ```

pub mod batch;
pub mod queue;
pub mod serve;
pub mod submit;

// Re-export key types
pub use batch::{ingest_files, store_recording, BatchOutcome, CallMetadata};
pub use queue::{work_queue, QueueError, WorkQueue, WorkReceiver};
pub use serve::{serve_lines, ServeStats, SubmitReply};
pub use submit::{parse_call_timestamp, IngestError, Ingestor, SubmitRequest};
