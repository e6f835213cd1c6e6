//! Newline-delimited JSON front end for the ingestor.
//!
//! Each input line is one [`SubmitRequest`] handled on its own task, like
//! one handler per request. Each handler writes one JSON reply line.
//! Finished handlers are reaped while reading, so a long-running session
//! only holds the ones still in flight.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, warn};

use crate::domain::RecordId;

use super::submit::{Ingestor, SubmitRequest};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SubmitReply {
    Accepted { record_id: RecordId, audio_ref: String },
    Rejected { error: String },
}

/// Counters for one serve session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub accepted: usize,
    pub rejected: usize,

    /// Replies that could not be written to the output
    pub unwritten_replies: usize,

    /// Handlers that died before reporting back
    pub failed_handlers: usize,
}

impl ServeStats {
    fn absorb(&mut self, done: Result<LineOutcome, JoinError>) {
        match done {
            Ok(outcome) => {
                if outcome.accepted {
                    self.accepted += 1;
                } else {
                    self.rejected += 1;
                }
                if !outcome.written {
                    self.unwritten_replies += 1;
                }
            }
            Err(e) => {
                self.failed_handlers += 1;
                error!(error = %e, "Submission handler failed");
            }
        }
    }
}

struct LineOutcome {
    accepted: bool,
    written: bool,
}

/// Handle submissions from `reader` until EOF, then wait for every handler.
///
/// Consumes the ingestor, so once this returns the queue has one producer
/// fewer.
pub async fn serve_lines<R, W>(
    ingestor: Ingestor,
    reader: R,
    writer: Arc<Mutex<W>>,
) -> std::io::Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    let mut handlers = JoinSet::new();
    let mut stats = ServeStats::default();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        handlers.spawn(handle_line(ingestor.clone(), line, writer.clone()));

        while let Some(done) = handlers.try_join_next() {
            stats.absorb(done);
        }
    }

    while let Some(done) = handlers.join_next().await {
        stats.absorb(done);
    }

    Ok(stats)
}

async fn handle_line<W>(ingestor: Ingestor, line: String, writer: Arc<Mutex<W>>) -> LineOutcome
where
    W: AsyncWrite + Unpin + Send,
{
    let reply = match serde_json::from_str::<SubmitRequest>(&line) {
        Ok(request) => {
            let audio_ref = request.audio_ref.to_string();
            match ingestor.submit(request).await {
                Ok(record_id) => SubmitReply::Accepted { record_id, audio_ref },
                Err(e) => SubmitReply::Rejected { error: e.to_string() },
            }
        }
        Err(e) => SubmitReply::Rejected {
            error: format!("Invalid submission: {}", e),
        },
    };

    let accepted = matches!(reply, SubmitReply::Accepted { .. });
    let written = match write_reply(&reply, &writer).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, ?reply, "Failed to write submission reply");
            false
        }
    };

    LineOutcome { accepted, written }
}

async fn write_reply<W>(reply: &SubmitReply, writer: &Mutex<W>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(reply)?;
    json.push('\n');

    let mut out = writer.lock().await;
    out.write_all(json.as_bytes()).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shapes() {
        let accepted = SubmitReply::Accepted {
            record_id: 4,
            audio_ref: "rec/a.wav".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&accepted).unwrap(),
            r#"{"record_id":4,"audio_ref":"rec/a.wav"}"#
        );

        let rejected = SubmitReply::Rejected {
            error: "Audio reference is empty".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&rejected).unwrap(),
            r#"{"error":"Audio reference is empty"}"#
        );
    }
}
