//! SQLite-backed storage gateway.
//!
//! One connection behind a mutex; every query runs on the blocking pool.
//! The mutex is what serializes writes from concurrent ingestion requests
//! and the worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::domain::{
    AnalysisResult, AudioRef, CallRecord, Category, CategoryId, CompanyId, DailySummary, Employee,
    EmployeeId, NewCallRecord, RecordId, SummaryId,
};

use super::{Storage, StorageError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    company_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    company_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS employees (
    employee_id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id  INTEGER NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
    username    TEXT NOT NULL UNIQUE,
    first_name  TEXT NOT NULL,
    last_name   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    category_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id           INTEGER NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
    category_name        TEXT NOT NULL,
    category_description TEXT,
    UNIQUE (company_id, category_name)
);

CREATE TABLE IF NOT EXISTS call_records (
    call_id           INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id       INTEGER NOT NULL REFERENCES employees(employee_id) ON DELETE CASCADE,
    category_id       INTEGER REFERENCES categories(category_id) ON DELETE SET NULL,
    call_timestamp    TEXT NOT NULL,
    call_duration     INTEGER NOT NULL,
    transcription     TEXT,
    audio_file_path   TEXT NOT NULL,
    conflict_detected INTEGER
);

CREATE TABLE IF NOT EXISTS daily_summaries (
    summary_id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
    day        TEXT NOT NULL,
    summary    TEXT NOT NULL,
    UNIQUE (company_id, day)
);

CREATE INDEX IF NOT EXISTS idx_call_records_audio ON call_records(audio_file_path);
CREATE INDEX IF NOT EXISTS idx_call_records_timestamp ON call_records(call_timestamp);
"#;

const RECORD_COLUMNS: &str = "cr.call_id, cr.employee_id, cr.call_timestamp, cr.call_duration, \
     cr.audio_file_path, cr.transcription, cr.conflict_detected, cr.category_id, \
     e.first_name || ' ' || e.last_name";

/// Timestamps are stored as fixed-width RFC 3339 UTC so string comparison
/// orders them correctly.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// SQLite storage gateway
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StorageError::CreateDir)?;
            }
        }

        Self::init(Connection::open(path)?)
    }

    /// Throwaway database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    pub async fn add_company(&self, name: &str) -> Result<CompanyId, StorageError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT INTO companies (company_name) VALUES (?1)", params![name])?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn add_employee(
        &self,
        company_id: CompanyId,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<EmployeeId, StorageError> {
        let (username, first_name, last_name) =
            (username.to_string(), first_name.to_string(), last_name.to_string());

        self.with_conn(move |conn| {
            if !company_exists(conn, company_id)? {
                return Err(StorageError::NotFound(format!("company {}", company_id)));
            }
            conn.execute(
                "INSERT INTO employees (company_id, username, first_name, last_name) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![company_id, username, first_name, last_name],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Employees of a company, ordered by id
    pub async fn list_employees(&self, company_id: CompanyId) -> Result<Vec<Employee>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT employee_id, company_id, username, first_name, last_name FROM employees \
                 WHERE company_id = ?1 ORDER BY employee_id",
            )?;
            let employees = stmt
                .query_map(params![company_id], |row| {
                    Ok(Employee {
                        id: row.get(0)?,
                        company_id: row.get(1)?,
                        username: row.get(2)?,
                        first_name: row.get(3)?,
                        last_name: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(employees)
        })
        .await
    }

    pub async fn update_employee(
        &self,
        employee_id: EmployeeId,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), StorageError> {
        let (username, first_name, last_name) =
            (username.to_string(), first_name.to_string(), last_name.to_string());

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE employees SET username = ?1, first_name = ?2, last_name = ?3 \
                 WHERE employee_id = ?4",
                params![username, first_name, last_name, employee_id],
            )?;
            if updated == 0 {
                return Err(StorageError::EmployeeNotFound(employee_id));
            }
            Ok(())
        })
        .await
    }

    /// Delete an employee together with their call records
    pub async fn delete_employee(&self, employee_id: EmployeeId) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM employees WHERE employee_id = ?1",
                params![employee_id],
            )?;
            if deleted == 0 {
                return Err(StorageError::EmployeeNotFound(employee_id));
            }
            Ok(())
        })
        .await
    }

    pub async fn company_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<CompanyId>, StorageError> {
        self.with_conn(move |conn| {
            let company = conn
                .query_row(
                    "SELECT company_id FROM employees WHERE employee_id = ?1",
                    params![employee_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(company)
        })
        .await
    }

    pub async fn add_category(
        &self,
        company_id: CompanyId,
        name: &str,
        description: Option<&str>,
    ) -> Result<CategoryId, StorageError> {
        let name = name.to_string();
        let description = description.map(str::to_string);

        self.with_conn(move |conn| {
            if !company_exists(conn, company_id)? {
                return Err(StorageError::NotFound(format!("company {}", company_id)));
            }
            conn.execute(
                "INSERT INTO categories (company_id, category_name, category_description) \
                 VALUES (?1, ?2, ?3)",
                params![company_id, name, description],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Delete a category, but only if it belongs to the given company
    pub async fn delete_category(
        &self,
        company_id: CompanyId,
        category_id: CategoryId,
    ) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM categories WHERE category_id = ?1 AND company_id = ?2",
                params![category_id, company_id],
            )?;
            if deleted == 0 {
                return Err(StorageError::NotFound(format!(
                    "category {} in company {}",
                    category_id, company_id
                )));
            }
            Ok(())
        })
        .await
    }

    /// Call records for a company in `[start, end]`, newest first
    pub async fn call_records(
        &self,
        company_id: CompanyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        employee_id: Option<EmployeeId>,
    ) -> Result<Vec<CallRecord>, StorageError> {
        let (start, end) = (format_timestamp(&start), format_timestamp(&end));

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM call_records cr \
                 JOIN employees e ON cr.employee_id = e.employee_id \
                 WHERE e.company_id = ?1 AND cr.call_timestamp BETWEEN ?2 AND ?3 \
                 AND (?4 IS NULL OR cr.employee_id = ?4) \
                 ORDER BY cr.call_timestamp DESC, cr.call_id DESC",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![company_id, start, end, employee_id], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Store the summary for a company's day; at most one per day
    pub async fn add_daily_summary(
        &self,
        company_id: CompanyId,
        day: NaiveDate,
        summary: &str,
    ) -> Result<SummaryId, StorageError> {
        let summary = summary.to_string();

        self.with_conn(move |conn| {
            if !company_exists(conn, company_id)? {
                return Err(StorageError::NotFound(format!("company {}", company_id)));
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO daily_summaries (company_id, day, summary) VALUES (?1, ?2, ?3)",
                params![company_id, format_day(day), summary],
            )?;
            if inserted == 0 {
                return Err(StorageError::DuplicateSummary { company_id, day });
            }
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn daily_summary(
        &self,
        company_id: CompanyId,
        day: NaiveDate,
    ) -> Result<Option<DailySummary>, StorageError> {
        self.with_conn(move |conn| {
            let summary = conn
                .query_row(
                    "SELECT summary_id, summary FROM daily_summaries WHERE company_id = ?1 AND day = ?2",
                    params![company_id, format_day(day)],
                    |row| {
                        Ok(DailySummary {
                            id: row.get(0)?,
                            company_id,
                            day,
                            summary: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(summary)
        })
        .await
    }

    pub async fn update_daily_summary(
        &self,
        company_id: CompanyId,
        day: NaiveDate,
        summary: &str,
    ) -> Result<(), StorageError> {
        let summary = summary.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE daily_summaries SET summary = ?1 WHERE company_id = ?2 AND day = ?3",
                params![summary, company_id, format_day(day)],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(format!(
                    "summary for {} in company {}",
                    day, company_id
                )));
            }
            Ok(())
        })
        .await
    }

    /// Most recent record for an audio reference
    pub async fn find_by_audio(&self, audio_ref: &AudioRef) -> Result<Option<CallRecord>, StorageError> {
        let audio = audio_ref.as_str().to_string();

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM call_records cr \
                 JOIN employees e ON cr.employee_id = e.employee_id \
                 WHERE cr.audio_file_path = ?1 ORDER BY cr.call_id DESC LIMIT 1",
                RECORD_COLUMNS
            );
            let record = conn
                .query_row(&sql, params![audio], record_from_row)
                .optional()?;
            Ok(record)
        })
        .await
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_provisional_record(&self, record: NewCallRecord) -> Result<RecordId, StorageError> {
        self.with_conn(move |conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM employees WHERE employee_id = ?1",
                    params![record.employee_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(StorageError::EmployeeNotFound(record.employee_id));
            }

            conn.execute(
                "INSERT INTO call_records \
                 (employee_id, category_id, call_timestamp, call_duration, transcription, \
                  audio_file_path, conflict_detected) \
                 VALUES (?1, NULL, ?2, ?3, NULL, ?4, NULL)",
                params![
                    record.employee_id,
                    format_timestamp(&record.timestamp),
                    record.duration_seconds,
                    record.audio_ref.as_str(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update_analysis(
        &self,
        audio_ref: &AudioRef,
        result: &AnalysisResult,
    ) -> Result<(), StorageError> {
        let audio = audio_ref.as_str().to_string();
        let result = result.clone();

        let updated = self
            .with_conn(move |conn| {
                let updated = conn.execute(
                    "UPDATE call_records \
                     SET transcription = ?1, conflict_detected = ?2, category_id = ?3 \
                     WHERE audio_file_path = ?4",
                    params![result.transcription, result.conflict_detected, result.category_id, audio],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            debug!(audio_ref = %audio_ref, "No call record matched analysis update");
        }

        Ok(())
    }

    async fn resolve_company_for_audio(
        &self,
        audio_ref: &AudioRef,
    ) -> Result<Option<CompanyId>, StorageError> {
        let audio = audio_ref.as_str().to_string();

        self.with_conn(move |conn| {
            let company = conn
                .query_row(
                    "SELECT e.company_id FROM call_records cr \
                     JOIN employees e ON cr.employee_id = e.employee_id \
                     WHERE cr.audio_file_path = ?1 ORDER BY cr.call_id DESC LIMIT 1",
                    params![audio],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(company)
        })
        .await
    }

    async fn list_categories(&self, company_id: CompanyId) -> Result<Vec<Category>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT category_id, category_name, category_description FROM categories \
                 WHERE company_id = ?1 ORDER BY category_id",
            )?;
            let categories = stmt
                .query_map(params![company_id], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(categories)
        })
        .await
    }
}

fn company_exists(conn: &Connection, company_id: CompanyId) -> Result<bool, StorageError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM companies WHERE company_id = ?1",
            params![company_id],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let raw_timestamp: String = row.get(2)?;
    let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let audio: String = row.get(4)?;

    Ok(CallRecord {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        timestamp,
        duration_seconds: row.get(3)?,
        audio_ref: AudioRef::new(audio),
        transcription: row.get(5)?,
        conflict_detected: row.get(6)?,
        category_id: row.get(7)?,
        employee_name: row.get(8)?,
    })
}
