use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    /// Newline-delimited identifier file, used instead of the log sheet.
    pub worklist_file: Option<String>,
    /// "sqlite" or "sheets"
    pub progress_store: Option<String>,
    /// "sheets" or "sqlite"
    pub result_sink: Option<String>,

    pub batch: Option<BatchConfig>,
    pub sheets: Option<SheetsConfig>,
    pub apify: Option<ApifyConfig>,
    pub google_auth: Option<GoogleAuthConfig>,
    pub task_queue: Option<TaskQueueConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: Option<usize>,
    pub cooldown_secs: Option<u64>,
    /// "timer", "durable" or "task_queue"
    pub trigger: Option<String>,
    /// "none", "restart" or "resume"
    pub startup: Option<String>,
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub api_base_url: Option<String>,
    pub log_sheet: Option<String>,
    pub log_range: Option<String>,
    /// Zero-based column of the identifier inside the log range.
    pub identifier_column: Option<usize>,
    pub results_sheet: Option<String>,
    pub results_range: Option<String>,
    pub progress_range: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ApifyConfig {
    pub api_token: Option<String>,
    pub actor_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GoogleAuthConfig {
    pub client_email: Option<String>,
    pub private_key: Option<String>,
    /// Pre-issued bearer token, skips the service account exchange.
    pub access_token: Option<String>,
    pub token_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Tasks collection URL, e.g. `.../projects/p/locations/l/queues/q/tasks`.
    pub queue_url: Option<String>,
    /// Public URL of `POST /v1/batch/start` the task calls back.
    pub target_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
