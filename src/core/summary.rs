//! Daily summaries of a company's calls.
//!
//! The day's transcripts are rendered one block per call, handed to an
//! adapter, and the answer is stored once per company and day.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument};

use crate::adapters::Adapter;
use crate::config::{ProviderKind, ResolvedConfig};
use crate::domain::{day_bounds, format_transcriptions_for_summary, CompanyId, DailySummary, EmployeeId};
use crate::stages::build_adapter;
use crate::storage::{SqliteStorage, StorageError};

pub const DEFAULT_PATTERN: &str = "summarize";

pub const DEFAULT_INSTRUCTION: &str = "You write end-of-day reports for a customer service \
team. The input holds the transcripts of one day's phone calls; each call starts with `---` \
followed by the employee's name. Summarize the main topics, recurring customer problems and \
any conflicts, mentioning employees by name where relevant. Be concise.";

pub fn default_action(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Fabric => DEFAULT_PATTERN,
        _ => DEFAULT_INSTRUCTION,
    }
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("No company found for employee {0}")]
    NoCompany(EmployeeId),

    #[error("Summary for {day} in company {company_id} already exists")]
    AlreadyExists { company_id: CompanyId, day: NaiveDate },

    #[error("Summarizer failed: {0:#}")]
    Summarizer(anyhow::Error),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for SummaryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateSummary { company_id, day } => Self::AlreadyExists { company_id, day },
            other => Self::Storage(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Created(DailySummary),

    /// No call that day had a transcription; nothing was stored
    NothingToSummarize { company_id: CompanyId, day: NaiveDate },
}

pub struct DailySummarizer {
    storage: Arc<SqliteStorage>,
    adapter: Arc<dyn Adapter>,
    action: String,
    timeout: Duration,
}

impl DailySummarizer {
    pub fn new(
        storage: Arc<SqliteStorage>,
        adapter: Arc<dyn Adapter>,
        action: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            adapter,
            action: action.into(),
            timeout,
        }
    }

    /// Build from the `summarizer` config section
    pub fn from_config(storage: Arc<SqliteStorage>, config: &ResolvedConfig) -> anyhow::Result<Self> {
        let settings = &config.summarizer;
        let adapter = build_adapter(settings)?.context("Summarizer provider is disabled")?;
        let action = settings
            .action
            .clone()
            .unwrap_or_else(|| default_action(settings.provider).to_string());

        Ok(Self::new(storage, adapter, action, config.pipeline.stage_timeout()))
    }

    /// Summarize the calls of the employee's company on `day`
    #[instrument(skip(self))]
    pub async fn create(&self, employee_id: EmployeeId, day: NaiveDate) -> Result<SummaryOutcome, SummaryError> {
        let company_id = self
            .storage
            .company_for_employee(employee_id)
            .await?
            .ok_or(SummaryError::NoCompany(employee_id))?;

        // Checked up front so a duplicate never costs a provider call
        if self.storage.daily_summary(company_id, day).await?.is_some() {
            return Err(SummaryError::AlreadyExists { company_id, day });
        }

        let (start, end) = day_bounds(day);
        let records = self.storage.call_records(company_id, start, end, None).await?;
        let input = format_transcriptions_for_summary(&records);

        if input.is_empty() {
            info!(company_id, %day, "No transcriptions to summarize");
            return Ok(SummaryOutcome::NothingToSummarize { company_id, day });
        }

        let output = self
            .adapter
            .execute(&self.action, &input, self.timeout)
            .await
            .map_err(SummaryError::Summarizer)?;
        let summary = output.content.trim().to_string();

        let id = self.storage.add_daily_summary(company_id, day, &summary).await?;
        info!(company_id, %day, summary_id = id, calls = records.len(), "Daily summary stored");

        Ok(SummaryOutcome::Created(DailySummary {
            id,
            company_id,
            day,
            summary,
        }))
    }
}
