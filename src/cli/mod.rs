//! Command-line interface for callscope.
//!
//! Provides commands for setting up companies, employees and categories,
//! ingesting recordings, running the long-lived ingestion service, and
//! reading back analysed call records.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{self, ResolvedConfig};
use crate::core::{DailySummarizer, SummaryOutcome, Worker, WorkerSummary};
use crate::domain::{CallStats, CompanyId, EmployeeId};
use crate::ingest::{
    ingest_files, parse_call_timestamp, serve_lines, work_queue, CallMetadata, Ingestor,
};
use crate::stages::AnalysisStages;
use crate::storage::{SqliteStorage, Storage};

/// callscope - Call recording ingestion and analysis
#[derive(Parser, Debug)]
#[command(name = "callscope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and recordings directory
    Init,

    /// Manage companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage employees
    Employee {
        #[command(subcommand)]
        command: EmployeeCommands,
    },

    /// Manage call categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Store recordings for an employee and analyse them
    Ingest {
        /// Audio files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Employee who made the calls
        #[arg(short, long)]
        employee: EmployeeId,

        /// Call timestamp, ISO 8601 (defaults to now)
        #[arg(short, long)]
        timestamp: Option<String>,

        /// Call duration in seconds
        #[arg(short, long, default_value = "0")]
        duration: u32,
    },

    /// Run the worker and accept JSON submissions on stdin, one per line
    Serve,

    /// List call records for a company
    Records {
        #[command(flatten)]
        filter: RecordFilter,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show call statistics for a company
    Stats {
        #[command(flatten)]
        filter: RecordFilter,
    },

    /// Manage daily call summaries
    Summary {
        #[command(subcommand)]
        command: SummaryCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CompanyCommands {
    /// Add a company
    Add { name: String },
}

#[derive(Subcommand, Debug)]
pub enum EmployeeCommands {
    /// Add an employee to a company
    Add {
        #[arg(short, long)]
        company: CompanyId,
        username: String,
        first_name: String,
        last_name: String,
    },

    /// List a company's employees
    List {
        #[arg(short, long)]
        company: CompanyId,
    },

    /// Replace an employee's username and name
    Update {
        employee_id: EmployeeId,
        username: String,
        first_name: String,
        last_name: String,
    },

    /// Delete an employee and their call records
    Delete { employee_id: EmployeeId },
}

#[derive(Subcommand, Debug)]
pub enum SummaryCommands {
    /// Summarize one day of calls for an employee's company
    Add {
        #[arg(short, long)]
        employee: EmployeeId,

        /// Day to summarize, YYYY-MM-DD (defaults to today, UTC)
        #[arg(short, long)]
        day: Option<String>,
    },

    /// Show a stored summary
    Show {
        #[arg(short, long)]
        company: CompanyId,
        #[arg(short, long)]
        day: String,
    },

    /// Replace the text of a stored summary
    Update {
        #[arg(short, long)]
        company: CompanyId,
        #[arg(short, long)]
        day: String,
        summary: String,
    },
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid day '{}'. Use YYYY-MM-DD.", raw))
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommands {
    /// Add a category to a company
    Add {
        #[arg(short, long)]
        company: CompanyId,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List a company's categories
    List {
        #[arg(short, long)]
        company: CompanyId,
    },

    /// Delete a category
    Delete {
        #[arg(short, long)]
        company: CompanyId,
        category_id: i64,
    },
}

#[derive(clap::Args, Debug)]
pub struct RecordFilter {
    #[arg(short, long)]
    pub company: CompanyId,

    /// Start of range, ISO 8601 (defaults to 7 days ago)
    #[arg(long)]
    pub start: Option<String>,

    /// End of range, ISO 8601 (defaults to now)
    #[arg(long)]
    pub end: Option<String>,

    /// Only this employee's calls
    #[arg(short, long)]
    pub employee: Option<EmployeeId>,
}

impl RecordFilter {
    fn range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let end = match &self.end {
            Some(raw) => parse_call_timestamp(raw)?,
            None => Utc::now(),
        };
        let start = match &self.start {
            Some(raw) => parse_call_timestamp(raw)?,
            None => end - ChronoDuration::days(7),
        };
        Ok((start, end))
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::config()?;

        match self.command {
            Commands::Init => init(config).await,
            Commands::Company { command } => company(config, command).await,
            Commands::Employee { command } => employee(config, command).await,
            Commands::Category { command } => category(config, command).await,
            Commands::Ingest {
                files,
                employee,
                timestamp,
                duration,
            } => ingest(config, files, employee, timestamp, duration).await,
            Commands::Serve => serve(config).await,
            Commands::Records { filter, json } => records(config, &filter, json).await,
            Commands::Stats { filter } => stats(config, &filter).await,
            Commands::Summary { command } => summary(config, command).await,
            Commands::Config => show_config(config),
        }
    }
}

fn open_storage(config: &ResolvedConfig) -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(&config.database)
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    Ok(Arc::new(storage))
}

/// Wire storage, stages, queue and worker together
fn start_pipeline(config: &ResolvedConfig, storage: Arc<dyn Storage>) -> (Ingestor, JoinHandle<WorkerSummary>) {
    let (queue, receiver) = work_queue();

    let ingestor = Ingestor::new(storage.clone(), queue)
        .with_allowed_extensions(config.ingest.allowed_extensions.clone());

    let worker = Worker::new(storage, AnalysisStages::from_config(config))
        .with_stage_timeout(config.pipeline.stage_timeout());

    (ingestor, worker.spawn(receiver))
}

async fn init(config: &ResolvedConfig) -> Result<()> {
    open_storage(config)?;
    tokio::fs::create_dir_all(&config.recordings)
        .await
        .with_context(|| format!("Failed to create {}", config.recordings.display()))?;

    println!("Database:   {}", config.database.display());
    println!("Recordings: {}", config.recordings.display());
    Ok(())
}

async fn company(config: &ResolvedConfig, command: CompanyCommands) -> Result<()> {
    let storage = open_storage(config)?;
    match command {
        CompanyCommands::Add { name } => {
            let id = storage.add_company(&name).await?;
            println!("Company '{}' created with id {}", name, id);
        }
    }
    Ok(())
}

async fn employee(config: &ResolvedConfig, command: EmployeeCommands) -> Result<()> {
    let storage = open_storage(config)?;
    match command {
        EmployeeCommands::Add {
            company,
            username,
            first_name,
            last_name,
        } => {
            let id = storage
                .add_employee(company, &username, &first_name, &last_name)
                .await?;
            println!("Employee '{}' created with id {}", username, id);
        }
        EmployeeCommands::List { company } => {
            let employees = storage.list_employees(company).await?;
            if employees.is_empty() {
                println!("No employees for company {}", company);
            }
            for employee in employees {
                println!("{:>4}  {:<20} {}", employee.id, employee.username, employee.full_name());
            }
        }
        EmployeeCommands::Update {
            employee_id,
            username,
            first_name,
            last_name,
        } => {
            storage
                .update_employee(employee_id, &username, &first_name, &last_name)
                .await?;
            println!("Employee {} updated", employee_id);
        }
        EmployeeCommands::Delete { employee_id } => {
            storage.delete_employee(employee_id).await?;
            println!("Employee {} deleted", employee_id);
        }
    }
    Ok(())
}

async fn category(config: &ResolvedConfig, command: CategoryCommands) -> Result<()> {
    let storage = open_storage(config)?;
    match command {
        CategoryCommands::Add {
            company,
            name,
            description,
        } => {
            let id = storage
                .add_category(company, &name, description.as_deref())
                .await?;
            println!("Category '{}' created with id {} for company {}", name, id, company);
        }
        CategoryCommands::List { company } => {
            let categories = storage.list_categories(company).await?;
            if categories.is_empty() {
                println!("No categories for company {}", company);
            }
            for category in categories {
                println!(
                    "{:>4}  {:<24} {}",
                    category.id,
                    category.name,
                    category.description.unwrap_or_default()
                );
            }
        }
        CategoryCommands::Delete {
            company,
            category_id,
        } => {
            storage.delete_category(company, category_id).await?;
            println!("Category {} deleted", category_id);
        }
    }
    Ok(())
}

async fn ingest(
    config: &ResolvedConfig,
    files: Vec<PathBuf>,
    employee: EmployeeId,
    timestamp: Option<String>,
    duration: u32,
) -> Result<()> {
    let meta = CallMetadata {
        employee_id: employee,
        timestamp: match timestamp {
            Some(raw) => parse_call_timestamp(&raw)?,
            None => Utc::now(),
        },
        duration_seconds: duration,
    };

    let storage = open_storage(config)?;
    let (ingestor, worker) = start_pipeline(config, storage);

    let outcome = ingest_files(&ingestor, &config.recordings, &files, &meta).await;
    for (file, record_id) in &outcome.queued {
        println!("Queued {} as call record {}", file.display(), record_id);
    }
    for (file, reason) in &outcome.failures {
        eprintln!("Skipping {}: {}", file.display(), reason);
    }

    // Closing the only producer lets the worker drain and stop, even when
    // some files failed
    drop(ingestor);
    let summary = worker.await.context("Worker task failed")?;

    println!();
    println!(
        "Submitted {}, processed {}, persisted {}, crashed {}",
        outcome.queued.len(),
        summary.processed,
        summary.persisted,
        summary.crashed
    );

    if !outcome.is_complete() {
        anyhow::bail!(
            "{} of {} files were not ingested",
            outcome.failures.len(),
            files.len()
        );
    }
    Ok(())
}

async fn serve(config: &ResolvedConfig) -> Result<()> {
    let storage = open_storage(config)?;
    let (ingestor, worker) = start_pipeline(config, storage);

    tracing::info!("Reading submissions from stdin");

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let stats = serve_lines(ingestor, BufReader::new(tokio::io::stdin()), stdout).await?;

    // stdin closed and the ingestor is gone: the worker finishes what is queued
    let summary = worker.await.context("Worker task failed")?;
    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        unwritten_replies = stats.unwritten_replies,
        failed_handlers = stats.failed_handlers,
        processed = summary.processed,
        "Serve finished"
    );
    Ok(())
}

async fn records(config: &ResolvedConfig, filter: &RecordFilter, json: bool) -> Result<()> {
    let storage = open_storage(config)?;
    let (start, end) = filter.range()?;
    let records = storage
        .call_records(filter.company, start, end, filter.employee)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No call records between {} and {}", start, end);
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<20} {:>6} {:<9} {:<8} TRANSCRIPTION",
        "ID", "TIMESTAMP", "EMPLOYEE", "SECS", "CONFLICT", "CATEGORY"
    );
    for record in records {
        let conflict = match record.conflict_detected {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        let category = record
            .category_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let transcription = match &record.transcription {
            Some(text) if text.chars().count() > 60 => {
                format!("{}...", text.chars().take(57).collect::<String>())
            }
            Some(text) => text.clone(),
            None => "(pending)".to_string(),
        };

        println!(
            "{:<6} {:<20} {:<20} {:>6} {:<9} {:<8} {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.employee_name.unwrap_or_default(),
            record.duration_seconds,
            conflict,
            category,
            transcription
        );
    }

    Ok(())
}

async fn stats(config: &ResolvedConfig, filter: &RecordFilter) -> Result<()> {
    let storage = open_storage(config)?;
    let (start, end) = filter.range()?;
    let records = storage
        .call_records(filter.company, start, end, filter.employee)
        .await?;
    let stats = CallStats::from_records(&records);

    println!("Company:        {}", filter.company);
    println!("Range:          {} .. {}", start, end);
    if let Some(employee) = filter.employee {
        println!("Employee:       {}", employee);
    }
    println!("Total calls:    {}", stats.total_calls);
    println!("Total duration: {}s", stats.total_duration_seconds);
    println!("Conflict rate:  {:.1}%", stats.conflict_percentage);
    Ok(())
}

async fn summary(config: &ResolvedConfig, command: SummaryCommands) -> Result<()> {
    let storage = open_storage(config)?;
    match command {
        SummaryCommands::Add { employee, day } => {
            let day = match day {
                Some(raw) => parse_day(&raw)?,
                None => Utc::now().date_naive(),
            };
            let summarizer = DailySummarizer::from_config(storage, config)?;

            match summarizer.create(employee, day).await? {
                SummaryOutcome::Created(summary) => {
                    println!(
                        "Summary {} for {} created in company {}",
                        summary.id, summary.day, summary.company_id
                    );
                    println!();
                    println!("{}", summary.summary);
                }
                SummaryOutcome::NothingToSummarize { day, .. } => {
                    println!("No transcription for {}", day);
                }
            }
        }
        SummaryCommands::Show { company, day } => {
            let day = parse_day(&day)?;
            match storage.daily_summary(company, day).await? {
                Some(summary) => println!("{}", summary.summary),
                None => anyhow::bail!("No summary found for company {} on {}", company, day),
            }
        }
        SummaryCommands::Update {
            company,
            day,
            summary,
        } => {
            let day = parse_day(&day)?;
            storage.update_daily_summary(company, day, &summary).await?;
            println!("Summary for company {} on {} updated", company, day);
        }
    }
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("Home:        {}", config.home.display());
    println!("Database:    {}", config.database.display());
    println!("Recordings:  {}", config.recordings.display());
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!();
    println!(
        "Transcriber: {} (model {}, language {})",
        if config.transcriber.enabled { "whisper" } else { "disabled" },
        config.transcriber.model,
        config.transcriber.language
    );
    println!("Conflict:    {:?}", config.conflict.provider);
    println!("Categorizer: {:?}", config.categorizer.provider);
    println!("Summarizer:  {:?}", config.summarizer.provider);
    println!("Stage timeout: {}s", config.pipeline.stage_timeout().as_secs());
    println!("Audio types: {}", config.ingest.allowed_extensions.join(", "));
    Ok(())
}
