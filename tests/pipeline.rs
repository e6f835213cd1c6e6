//! Worker Pipeline Integration Tests
//!
//! Drives the worker with scripted providers and an in-memory storage fake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callscope::domain::{
    AnalysisResult, AudioRef, Category, CompanyId, NewCallRecord, RecordId, Stage, StageStatus,
    WorkItem,
};
use callscope::ingest::work_queue;
use callscope::stages::{AnalysisStages, Categorizer, ConflictDetector, StageError, Transcriber};
use callscope::storage::{Storage, StorageError};
use callscope::{Worker, WorkerSummary};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeStorage {
    updates: Mutex<Vec<(AudioRef, AnalysisResult)>>,
    company: Option<CompanyId>,
    categories: Vec<Category>,
    fail_updates: bool,
}

impl FakeStorage {
    fn with_company(company: CompanyId, categories: Vec<Category>) -> Self {
        Self {
            company: Some(company),
            categories,
            ..Self::default()
        }
    }

    fn updates(&self) -> Vec<(AudioRef, AnalysisResult)> {
        self.updates.lock().unwrap().clone()
    }

    fn result_for(&self, audio: &str) -> AnalysisResult {
        self.updates()
            .into_iter()
            .find(|(audio_ref, _)| audio_ref.as_str() == audio)
            .map(|(_, result)| result)
            .unwrap()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn create_provisional_record(&self, _record: NewCallRecord) -> Result<RecordId, StorageError> {
        Ok(1)
    }

    async fn update_analysis(
        &self,
        audio_ref: &AudioRef,
        result: &AnalysisResult,
    ) -> Result<(), StorageError> {
        self.updates
            .lock()
            .unwrap()
            .push((audio_ref.clone(), result.clone()));
        if self.fail_updates {
            return Err(StorageError::NotFound("disk unavailable".to_string()));
        }
        Ok(())
    }

    async fn resolve_company_for_audio(
        &self,
        _audio_ref: &AudioRef,
    ) -> Result<Option<CompanyId>, StorageError> {
        Ok(self.company)
    }

    async fn list_categories(&self, _company_id: CompanyId) -> Result<Vec<Category>, StorageError> {
        Ok(self.categories.clone())
    }
}

#[derive(Clone)]
enum Script {
    Text(&'static str),
    Fail,
    Hang,
    Panic,
}

/// Transcriber answering per audio file name
struct ScriptedTranscriber {
    scripts: HashMap<&'static str, Script>,
}

impl ScriptedTranscriber {
    fn new(scripts: &[(&'static str, Script)]) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts.iter().cloned().collect(),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, audio_ref: &AudioRef) -> Result<String, StageError> {
        match self.scripts.get(audio_ref.as_str()).cloned().unwrap_or(Script::Fail) {
            Script::Text(text) => Ok(text.to_string()),
            Script::Fail => Err(StageError::Provider("whisper exited with status 1".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
            Script::Panic => panic!("decoder crashed on {}", audio_ref),
        }
    }
}

struct FixedDetector {
    answer: Option<bool>,
    calls: AtomicUsize,
}

impl FixedDetector {
    fn new(answer: Option<bool>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ConflictDetector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn detect(&self, _text: &str) -> Result<bool, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .ok_or_else(|| StageError::Provider("rate limited".to_string()))
    }
}

struct FixedCategorizer {
    answer: &'static str,
    calls: AtomicUsize,
}

impl FixedCategorizer {
    fn new(answer: &'static str) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Categorizer for FixedCategorizer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn categorize(&self, _categories: &[Category], _text: &str) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.to_string())
    }
}

struct PanickingCategorizer;

#[async_trait]
impl Categorizer for PanickingCategorizer {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn categorize(&self, _categories: &[Category], _text: &str) -> Result<String, StageError> {
        panic!("model client poisoned")
    }
}

fn company_categories() -> Vec<Category> {
    vec![
        Category::new(1, "Complaint").with_description("Customer is unhappy"),
        Category::new(2, "Sales"),
        Category::new(3, "Support"),
    ]
}

/// Enqueue every reference, close the queue and run the worker to completion
async fn run_items(worker: Worker, refs: &[&str]) -> WorkerSummary {
    let (queue, receiver) = work_queue();
    for audio in refs {
        queue.enqueue(WorkItem::new(AudioRef::new(*audio))).unwrap();
    }
    drop(queue);
    worker.run(receiver).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_analysis_is_persisted() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[(
            "emp42_abc.wav",
            Script::Text("the product broke"),
        )]))
        .with_conflict_detector(FixedDetector::new(Some(true)))
        .with_categorizer(FixedCategorizer::new("1"));

    let summary = run_items(Worker::new(storage.clone(), stages), &["emp42_abc.wav"]).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.persisted, 1);
    assert_eq!(
        storage.result_for("emp42_abc.wav"),
        AnalysisResult {
            transcription: Some("the product broke".to_string()),
            conflict_detected: Some(true),
            category_id: Some(1),
        }
    );
}

#[tokio::test]
async fn test_empty_transcription_skips_analysis() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let detector = FixedDetector::new(Some(true));
    let categorizer = FixedCategorizer::new("1");
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[("silence.wav", Script::Text("  "))]))
        .with_conflict_detector(detector.clone())
        .with_categorizer(categorizer.clone());

    let worker = Worker::new(storage.clone(), stages);
    let report = worker.process_item(&WorkItem::new(AudioRef::new("silence.wav"))).await;

    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(categorizer.calls.load(Ordering::SeqCst), 0);
    assert!(report.status(Stage::DetectConflict).unwrap().is_skipped());
    assert!(report.status(Stage::Categorize).unwrap().is_skipped());

    let result = storage.result_for("silence.wav");
    assert_eq!(result.transcription.as_deref(), Some(""));
    assert_eq!(result.conflict_detected, None);
    assert_eq!(result.category_id, None);
}

#[tokio::test]
async fn test_transcriber_failure_persists_empty_fields_and_continues() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[
            ("broken.wav", Script::Fail),
            ("good.wav", Script::Text("I want a refund")),
        ]))
        .with_conflict_detector(FixedDetector::new(Some(false)))
        .with_categorizer(FixedCategorizer::new("2"));

    let summary = run_items(Worker::new(storage.clone(), stages), &["broken.wav", "good.wav"]).await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.persisted, 2);
    assert_eq!(storage.result_for("broken.wav"), AnalysisResult::default());

    let good = storage.result_for("good.wav");
    assert_eq!(good.transcription.as_deref(), Some("I want a refund"));
    assert_eq!(good.conflict_detected, Some(false));
    assert_eq!(good.category_id, Some(2));
}

#[tokio::test]
async fn test_stage_timeout_is_a_stage_failure() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[
            ("slow.wav", Script::Hang),
            ("next.wav", Script::Text("hello")),
        ]))
        .with_conflict_detector(FixedDetector::new(Some(false)));

    let worker = Worker::new(storage.clone(), stages).with_stage_timeout(Duration::from_millis(50));
    let report = worker.process_item(&WorkItem::new(AudioRef::new("slow.wav"))).await;

    match report.status(Stage::Transcribe) {
        Some(StageStatus::Failed(reason)) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout failure, got {:?}", other),
    }
    assert!(report.persisted());
    assert_eq!(storage.result_for("slow.wav"), AnalysisResult::default());

    let summary = run_items(worker, &["next.wav"]).await;
    assert_eq!(summary.persisted, 1);
    assert_eq!(storage.result_for("next.wav").transcription.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_detector_failure_does_not_block_categorization() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[("call.wav", Script::Text("hi there"))]))
        .with_conflict_detector(FixedDetector::new(None))
        .with_categorizer(FixedCategorizer::new("3"));

    let report = Worker::new(storage.clone(), stages)
        .process_item(&WorkItem::new(AudioRef::new("call.wav")))
        .await;

    assert!(report.status(Stage::DetectConflict).unwrap().is_failed());
    assert!(report.status(Stage::Categorize).unwrap().is_completed());

    let result = storage.result_for("call.wav");
    assert_eq!(result.transcription.as_deref(), Some("hi there"));
    assert_eq!(result.conflict_detected, None);
    assert_eq!(result.category_id, Some(3));
}

#[tokio::test]
async fn test_panicking_transcriber_still_persists() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none().with_transcriber(ScriptedTranscriber::new(&[
        ("crash.wav", Script::Panic),
        ("after.wav", Script::Text("still running")),
    ]));

    let summary = run_items(Worker::new(storage.clone(), stages), &["crash.wav", "after.wav"]).await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.crashed, 0);
    assert_eq!(summary.persisted, 2);
    assert_eq!(storage.result_for("crash.wav"), AnalysisResult::default());
    assert_eq!(
        storage.result_for("after.wav").transcription.as_deref(),
        Some("still running")
    );
}

#[tokio::test]
async fn test_categorizer_panic_keeps_earlier_results() {
    let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[(
            "emp42_abc.wav",
            Script::Text("the product broke"),
        )]))
        .with_conflict_detector(FixedDetector::new(Some(true)))
        .with_categorizer(Arc::new(PanickingCategorizer));

    let worker = Worker::new(storage.clone(), stages);
    let report = worker
        .process_item(&WorkItem::new(AudioRef::new("emp42_abc.wav")))
        .await;

    match report.status(Stage::Categorize) {
        Some(StageStatus::Failed(reason)) => assert!(reason.contains("panicked")),
        other => panic!("expected categorize failure, got {:?}", other),
    }
    assert!(report.persisted());
    assert_eq!(storage.updates().len(), 1);
    assert_eq!(
        storage.result_for("emp42_abc.wav"),
        AnalysisResult {
            transcription: Some("the product broke".to_string()),
            conflict_detected: Some(true),
            category_id: None,
        }
    );

    let summary = run_items(worker, &["emp42_abc.wav"]).await;
    assert_eq!(summary.crashed, 0);
    assert_eq!(summary.persisted, 1);
}

#[tokio::test]
async fn test_unresolved_company_skips_categorization() {
    let storage = Arc::new(FakeStorage::default());
    let categorizer = FixedCategorizer::new("1");
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[("orphan.wav", Script::Text("hello"))]))
        .with_conflict_detector(FixedDetector::new(Some(false)))
        .with_categorizer(categorizer.clone());

    let report = Worker::new(storage.clone(), stages)
        .process_item(&WorkItem::new(AudioRef::new("orphan.wav")))
        .await;

    assert_eq!(categorizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        report.status(Stage::Categorize),
        Some(&StageStatus::skipped("company not resolved"))
    );

    let result = storage.result_for("orphan.wav");
    assert_eq!(result.conflict_detected, Some(false));
    assert_eq!(result.category_id, None);
}

#[tokio::test]
async fn test_categorizer_answers_are_normalized() {
    let cases: [(&'static str, Option<i64>); 5] = [
        ("0", None),
        ("abc", None),
        ("", None),
        ("3", Some(3)),
        ("99", None),
    ];

    for (answer, expected) in cases {
        let storage = Arc::new(FakeStorage::with_company(7, company_categories()));
        let stages = AnalysisStages::none()
            .with_transcriber(ScriptedTranscriber::new(&[("call.wav", Script::Text("billing issue"))]))
            .with_categorizer(FixedCategorizer::new(answer));

        let report = Worker::new(storage.clone(), stages)
            .process_item(&WorkItem::new(AudioRef::new("call.wav")))
            .await;

        assert!(report.status(Stage::Categorize).unwrap().is_completed());
        assert_eq!(
            storage.result_for("call.wav").category_id,
            expected,
            "categorizer answer {:?}",
            answer
        );
    }
}

#[tokio::test]
async fn test_persist_runs_once_when_everything_fails() {
    let storage = Arc::new(FakeStorage {
        fail_updates: true,
        ..FakeStorage::with_company(7, company_categories())
    });
    let stages = AnalysisStages::none()
        .with_transcriber(ScriptedTranscriber::new(&[("doomed.wav", Script::Fail)]))
        .with_conflict_detector(FixedDetector::new(None))
        .with_categorizer(FixedCategorizer::new("x"));

    let summary = run_items(Worker::new(storage.clone(), stages), &["doomed.wav"]).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.persisted, 0);
    assert_eq!(storage.updates().len(), 1);
}

#[tokio::test]
async fn test_no_stages_still_persists() {
    let storage = Arc::new(FakeStorage::default());

    let report = Worker::new(storage.clone(), AnalysisStages::none())
        .process_item(&WorkItem::new(AudioRef::new("bare.wav")))
        .await;

    assert!(report.status(Stage::Transcribe).unwrap().is_skipped());
    assert!(report.persisted());
    assert_eq!(storage.updates().len(), 1);
    assert_eq!(storage.result_for("bare.wav"), AnalysisResult::default());
}

#[tokio::test]
async fn test_items_processed_in_arrival_order() {
    let storage = Arc::new(FakeStorage::default());
    let stages = AnalysisStages::none().with_transcriber(ScriptedTranscriber::new(&[
        ("1.wav", Script::Text("one")),
        ("2.wav", Script::Text("two")),
        ("3.wav", Script::Text("three")),
    ]));

    run_items(Worker::new(storage.clone(), stages), &["1.wav", "2.wav", "3.wav"]).await;

    let order: Vec<String> = storage
        .updates()
        .into_iter()
        .map(|(audio_ref, _)| audio_ref.to_string())
        .collect();
    assert_eq!(order, vec!["1.wav", "2.wav", "3.wav"]);
}
