//! Storage gateway for call records.
//!
//! The pipeline only needs four operations; they are expressed as a trait so
//! the worker and the ingestor can run against SQLite in production and an
//! in-memory fake in tests.

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{AnalysisResult, AudioRef, Category, CompanyId, EmployeeId, NewCallRecord, RecordId};

pub use sqlite::SqliteStorage;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Employee {0} does not exist")]
    EmployeeNotFound(EmployeeId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Summary for {day} in company {company_id} already exists")]
    DuplicateSummary { company_id: CompanyId, day: NaiveDate },

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Operations the ingestion path and the worker need from persistence
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a call record with every analysis field empty
    async fn create_provisional_record(&self, record: NewCallRecord) -> Result<RecordId, StorageError>;

    /// Write analysis fields onto the record with this audio reference.
    ///
    /// Matching no record is not an error.
    async fn update_analysis(
        &self,
        audio_ref: &AudioRef,
        result: &AnalysisResult,
    ) -> Result<(), StorageError>;

    /// Company of the employee who owns the recording
    async fn resolve_company_for_audio(
        &self,
        audio_ref: &AudioRef,
    ) -> Result<Option<CompanyId>, StorageError>;

    /// Categories defined by a company, ordered by id
    async fn list_categories(&self, company_id: CompanyId) -> Result<Vec<Category>, StorageError>;
}
