//! Daily Summary Integration Tests
//!
//! A canned adapter stands in for the hosted model; storage is a real
//! SQLite file.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use callscope::adapters::{Adapter, AdapterOutput};
use callscope::core::{DailySummarizer, SummaryError, SummaryOutcome};
use callscope::domain::{AnalysisResult, AudioRef, NewCallRecord};
use callscope::storage::{SqliteStorage, Storage};
use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

struct CannedAdapter {
    reply: Option<String>,
    inputs: Mutex<Vec<String>>,
}

impl CannedAdapter {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Adapter for CannedAdapter {
    fn name(&self) -> &str {
        "canned"
    }

    async fn execute(&self, _action: &str, input: &str, _timeout: Duration) -> Result<AdapterOutput> {
        self.inputs.lock().unwrap().push(input.to_string());
        match &self.reply {
            Some(reply) => Ok(AdapterOutput::new(reply.clone())),
            None => anyhow::bail!("quota exceeded"),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    storage: Arc<SqliteStorage>,
    company: i64,
    jane: i64,
    rick: i64,
}

fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(SqliteStorage::open(&dir.path().join("callscope.sqlite")).unwrap());
    let company = storage.add_company("Acme").await.unwrap();
    let jane = storage.add_employee(company, "jdoe", "Jane", "Doe").await.unwrap();
    let rick = storage.add_employee(company, "rroe", "Rick", "Roe").await.unwrap();

    Fixture {
        _dir: dir,
        storage,
        company,
        jane,
        rick,
    }
}

/// Store a call on 2024-05-01 and, when given, its transcription
async fn call(f: &Fixture, employee_id: i64, audio: &str, hour: u32, text: Option<&str>) {
    let audio_ref = AudioRef::new(audio);
    f.storage
        .create_provisional_record(NewCallRecord {
            employee_id,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
            duration_seconds: 60,
            audio_ref: audio_ref.clone(),
        })
        .await
        .unwrap();

    if let Some(text) = text {
        let result = AnalysisResult {
            transcription: Some(text.to_string()),
            ..AnalysisResult::default()
        };
        f.storage.update_analysis(&audio_ref, &result).await.unwrap();
    }
}

fn summarizer(f: &Fixture, adapter: Arc<CannedAdapter>) -> DailySummarizer {
    DailySummarizer::new(f.storage.clone(), adapter, "summarize", Duration::from_secs(5))
}

#[tokio::test]
async fn test_summary_covers_the_day_and_is_stored() {
    let f = fixture().await;
    call(&f, f.rick, "rec/late.wav", 16, Some("Refund approved. ")).await;
    call(&f, f.jane, "rec/early.wav", 9, Some("Customer asked about delivery.")).await;
    call(&f, f.jane, "rec/silent.wav", 11, None).await;

    // Outside the day
    let next_day = AudioRef::new("rec/next.wav");
    f.storage
        .create_provisional_record(NewCallRecord {
            employee_id: f.jane,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            duration_seconds: 60,
            audio_ref: next_day.clone(),
        })
        .await
        .unwrap();

    let adapter = CannedAdapter::replying("  Two calls, one refund.\n");
    let outcome = assert_ok!(summarizer(&f, adapter.clone()).create(f.rick, may_first()).await);

    assert_eq!(
        adapter.inputs(),
        vec!["---Jane Doe Customer asked about delivery.\n\n---Rick Roe Refund approved.".to_string()]
    );

    let created = match outcome {
        SummaryOutcome::Created(summary) => summary,
        other => panic!("expected a new summary, got {:?}", other),
    };
    assert_eq!(created.company_id, f.company);
    assert_eq!(created.day, may_first());
    assert_eq!(created.summary, "Two calls, one refund.");

    let stored = f.storage.daily_summary(f.company, may_first()).await.unwrap();
    assert_eq!(stored, Some(created));
}

#[tokio::test]
async fn test_existing_summary_skips_the_provider() {
    let f = fixture().await;
    call(&f, f.jane, "rec/a.wav", 9, Some("Hello")).await;
    f.storage
        .add_daily_summary(f.company, may_first(), "Already written")
        .await
        .unwrap();

    let adapter = CannedAdapter::replying("New text");
    let err = assert_err!(summarizer(&f, adapter.clone()).create(f.jane, may_first()).await);

    assert!(matches!(err, SummaryError::AlreadyExists { company_id, .. } if company_id == f.company));
    assert!(adapter.inputs().is_empty());
    assert_eq!(
        f.storage.daily_summary(f.company, may_first()).await.unwrap().unwrap().summary,
        "Already written"
    );
}

#[tokio::test]
async fn test_day_without_transcriptions_stores_nothing() {
    let f = fixture().await;
    call(&f, f.jane, "rec/pending.wav", 9, None).await;
    call(&f, f.jane, "rec/blank.wav", 10, Some("   ")).await;

    let adapter = CannedAdapter::replying("unused");
    let outcome = assert_ok!(summarizer(&f, adapter.clone()).create(f.jane, may_first()).await);

    assert_eq!(
        outcome,
        SummaryOutcome::NothingToSummarize {
            company_id: f.company,
            day: may_first(),
        }
    );
    assert!(adapter.inputs().is_empty());
    assert_eq!(f.storage.daily_summary(f.company, may_first()).await.unwrap(), None);
}

#[tokio::test]
async fn test_unknown_employee_has_no_company() {
    let f = fixture().await;

    let err = assert_err!(
        summarizer(&f, CannedAdapter::replying("unused"))
            .create(404, may_first())
            .await
    );
    assert!(matches!(err, SummaryError::NoCompany(404)));
}

#[tokio::test]
async fn test_provider_failure_stores_nothing() {
    let f = fixture().await;
    call(&f, f.jane, "rec/a.wav", 9, Some("Hello")).await;

    let adapter = CannedAdapter::failing();
    let err = assert_err!(summarizer(&f, adapter.clone()).create(f.jane, may_first()).await);

    assert!(matches!(err, SummaryError::Summarizer(_)));
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(adapter.inputs().len(), 1);
    assert_eq!(f.storage.daily_summary(f.company, may_first()).await.unwrap(), None);
}
