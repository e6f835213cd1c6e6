//! Configuration for callscope.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CALLSCOPE_HOME, CALLSCOPE_DATABASE, CALLSCOPE_RECORDINGS)
//! 2. Config file (.callscope/config.yaml)
//! 3. Defaults (~/.callscope)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callscope/config.yaml
//! - Relative paths in the config file are resolved against the .callscope/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Extensions accepted by the ingestion path when the config file says nothing
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "ogg", "flac", "aac", "mp4"];

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transcriber: TranscriberSettings,
    #[serde(default)]
    pub conflict: AnalyzerSettings,
    #[serde(default)]
    pub categorizer: AnalyzerSettings,
    #[serde(default)]
    pub summarizer: AnalyzerSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Where uploaded recordings are stored
    pub recordings: Option<String>,
}

/// Which backend an analysis stage uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Fabric,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberSettings {
    pub enabled: bool,
    /// Path to the whisper binary (falls back to WHISPER_PATH, then `whisper`)
    pub binary: Option<String>,
    pub model: String,
    pub language: String,
}

impl Default for TranscriberSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            model: "base".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Settings shared by the conflict detector, the categorizer and the daily
/// summarizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub provider: ProviderKind,
    /// Fabric pattern name or model instruction; a built-in default when unset
    pub action: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub fabric_binary: Option<String>,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            action: None,
            model: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            fabric_binary: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound for any single stage of one work item
    pub stage_timeout_seconds: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: 120,
        }
    }
}

impl PipelineSettings {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub database: PathBuf,
    pub recordings: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub transcriber: TranscriberSettings,
    pub conflict: AnalyzerSettings,
    pub categorizer: AnalyzerSettings,
    pub summarizer: AnalyzerSettings,
    pub pipeline: PipelineSettings,
    pub ingest: IngestSettings,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`, no config file
    pub fn for_home(home: PathBuf) -> Self {
        Self {
            database: home.join("callscope.sqlite"),
            recordings: home.join("recordings"),
            home,
            config_file: None,
            transcriber: TranscriberSettings::default(),
            conflict: AnalyzerSettings::default(),
            categorizer: AnalyzerSettings::default(),
            summarizer: AnalyzerSettings::default(),
            pipeline: PipelineSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".callscope").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file, environment and defaults
fn resolve(file: ConfigFile, config_file: Option<PathBuf>, default_home: PathBuf) -> ResolvedConfig {
    let base = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let home = std::env::var("CALLSCOPE_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| file.paths.home.as_deref().map(|p| resolve_path(&base, p)))
        .unwrap_or(default_home);

    let database = std::env::var("CALLSCOPE_DATABASE")
        .map(PathBuf::from)
        .ok()
        .or_else(|| file.paths.database.as_deref().map(|p| resolve_path(&base, p)))
        .unwrap_or_else(|| home.join("callscope.sqlite"));

    let recordings = std::env::var("CALLSCOPE_RECORDINGS")
        .map(PathBuf::from)
        .ok()
        .or_else(|| file.paths.recordings.as_deref().map(|p| resolve_path(&base, p)))
        .unwrap_or_else(|| home.join("recordings"));

    let mut ingest = file.ingest;
    ingest.allowed_extensions = ingest
        .allowed_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    ResolvedConfig {
        home,
        database,
        recordings,
        config_file,
        transcriber: file.transcriber,
        conflict: file.conflict,
        categorizer: file.categorizer,
        summarizer: file.summarizer,
        pipeline: file.pipeline,
        ingest,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".callscope");

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(file, config_file, default_home))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
