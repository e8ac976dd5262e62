mod file_config;

pub use file_config::{
    ApifyConfig, BatchConfig, FileConfig, GoogleAuthConfig, SheetsConfig, TaskQueueConfig,
};

use crate::continuation::{TaskQueueSettings, TriggerKind};
use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ACTOR_URL: &str = "https://api.apify.com/v2/acts/kaitoeasyapi~twitter-x-data-tweet-scraper-pay-per-result-cheapest/run-sync-get-dataset-items";
pub const DEFAULT_SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub batch_size: Option<usize>,
    pub cooldown_secs: Option<u64>,
    pub trigger: Option<TriggerKind>,
    pub startup: Option<StartupMode>,
    pub worklist_file: Option<PathBuf>,

    // Secrets, usually taken from the environment
    pub apify_api_token: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub google_client_email: Option<String>,
    pub google_private_key: Option<String>,
    pub google_access_token: Option<String>,
}

/// What to do with the batch chain when the process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Wait for an HTTP trigger.
    None,
    /// Start over from the first item.
    Restart,
    /// Continue from the persisted progress record.
    #[default]
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStoreKind {
    #[default]
    Sqlite,
    Sheets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResultSinkKind {
    #[default]
    Sheets,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub worklist_file: Option<PathBuf>,
    pub progress_store: ProgressStoreKind,
    pub result_sink: ResultSinkKind,

    pub batch: BatchSettings,
    pub sheets: SheetsSettings,
    pub apify: ApifySettings,
    pub google_auth: GoogleAuthSettings,
    pub task_queue: Option<TaskQueueSettings>,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub cooldown_secs: u64,
    pub trigger: TriggerKind,
    pub startup: StartupMode,
    pub retry: RetrySettings,
}

impl BatchSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cooldown_secs: 16 * 60,
            trigger: TriggerKind::Durable,
            startup: StartupMode::Resume,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 16 * 60,
            max_backoff_secs: 4 * 60 * 60,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetsSettings {
    pub spreadsheet_id: Option<String>,
    pub api_base_url: String,
    pub log_sheet: String,
    pub log_range: String,
    pub identifier_column: usize,
    pub results_sheet: String,
    pub results_range: String,
    pub progress_range: String,
    pub timeout_secs: u64,
}

impl SheetsSettings {
    /// A1 range of the worklist, e.g. `Log!A2:D`.
    pub fn worklist_range(&self) -> String {
        format!("{}!{}", self.log_sheet, self.log_range)
    }

    /// A1 range results are appended to, e.g. `PostMetrics!A1:L`.
    pub fn results_append_range(&self) -> String {
        format!("{}!{}", self.results_sheet, self.results_range)
    }
}

impl Default for SheetsSettings {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            api_base_url: DEFAULT_SHEETS_API_URL.to_string(),
            log_sheet: "Log".to_string(),
            log_range: "A2:D".to_string(),
            identifier_column: 3,
            results_sheet: "PostMetrics".to_string(),
            results_range: "A1:L".to_string(),
            progress_range: "Progress!A2:E2".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApifySettings {
    pub api_token: String,
    pub actor_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GoogleAuthSettings {
    pub client_email: Option<String>,
    pub private_key: Option<String>,
    pub access_token: Option<String>,
    pub token_url: String,
}

impl GoogleAuthSettings {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() || (self.client_email.is_some() && self.private_key.is_some())
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| RequestsLoggingLevel::from_str(&s, true).ok())
            .unwrap_or_else(|| cli.logging_level.clone());

        let worklist_file = file
            .worklist_file
            .map(PathBuf::from)
            .or_else(|| cli.worklist_file.clone());
        let progress_store = match file.progress_store {
            Some(s) => parse_choice("progress_store", &s)?,
            None => ProgressStoreKind::default(),
        };
        let result_sink = match file.result_sink {
            Some(s) => parse_choice("result_sink", &s)?,
            None => ResultSinkKind::default(),
        };

        let batch = Self::resolve_batch(cli, file.batch.unwrap_or_default())?;
        let sheets = Self::resolve_sheets(cli, file.sheets.unwrap_or_default());

        let apify_file = file.apify.unwrap_or_default();
        let apify = ApifySettings {
            api_token: apify_file
                .api_token
                .or_else(|| cli.apify_api_token.clone())
                .ok_or_else(|| {
                    anyhow!("Apify API token must be specified via APIFY_API_TOKEN or [apify] api_token")
                })?,
            actor_url: apify_file
                .actor_url
                .unwrap_or_else(|| DEFAULT_ACTOR_URL.to_string()),
            timeout_secs: apify_file.timeout_secs.unwrap_or(300),
        };

        let auth_file = file.google_auth.unwrap_or_default();
        let google_auth = GoogleAuthSettings {
            client_email: auth_file
                .client_email
                .or_else(|| cli.google_client_email.clone()),
            private_key: auth_file
                .private_key
                .or_else(|| cli.google_private_key.clone()),
            access_token: auth_file
                .access_token
                .or_else(|| cli.google_access_token.clone()),
            token_url: auth_file
                .token_url
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        };

        let task_queue = match batch.trigger {
            TriggerKind::TaskQueue => {
                let tq = file.task_queue.unwrap_or_default();
                match (tq.queue_url, tq.target_url) {
                    (Some(queue_url), Some(target_url)) => Some(TaskQueueSettings {
                        queue_url,
                        target_url,
                    }),
                    _ => bail!(
                        "trigger = \"task_queue\" requires [task_queue] queue_url and target_url"
                    ),
                }
            }
            _ => None,
        };

        let config = Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            worklist_file,
            progress_store,
            result_sink,
            batch,
            sheets,
            apify,
            google_auth,
            task_queue,
        };

        if config.uses_sheets() {
            if config.sheets.spreadsheet_id.is_none() {
                bail!("Spreadsheet id must be specified via SPREADSHEET_ID or [sheets] spreadsheet_id");
            }
            if !config.google_auth.is_configured() {
                bail!("Google credentials are required: set GOOGLE_CLIENT_EMAIL and GOOGLE_PRIVATE_KEY, or GOOGLE_ACCESS_TOKEN");
            }
        }
        if config.batch.trigger == TriggerKind::TaskQueue && !config.google_auth.is_configured() {
            bail!("trigger = \"task_queue\" requires Google credentials");
        }

        Ok(config)
    }

    fn resolve_batch(cli: &CliConfig, file: BatchConfig) -> Result<BatchSettings> {
        let defaults = BatchSettings::default();
        let batch_size = file
            .batch_size
            .or(cli.batch_size)
            .unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }
        let trigger = match file.trigger {
            Some(s) => parse_choice("trigger", &s)?,
            None => cli.trigger.unwrap_or(defaults.trigger),
        };
        let startup = match file.startup {
            Some(s) => parse_choice("startup", &s)?,
            None => cli.startup.unwrap_or(defaults.startup),
        };
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_retries: file.max_retries.unwrap_or(retry_defaults.max_retries),
            initial_backoff_secs: file
                .initial_backoff_secs
                .unwrap_or(retry_defaults.initial_backoff_secs),
            max_backoff_secs: file
                .max_backoff_secs
                .unwrap_or(retry_defaults.max_backoff_secs),
            backoff_multiplier: file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };

        Ok(BatchSettings {
            batch_size,
            cooldown_secs: file
                .cooldown_secs
                .or(cli.cooldown_secs)
                .unwrap_or(defaults.cooldown_secs),
            trigger,
            startup,
            retry,
        })
    }

    fn resolve_sheets(cli: &CliConfig, file: SheetsConfig) -> SheetsSettings {
        let defaults = SheetsSettings::default();
        SheetsSettings {
            spreadsheet_id: file.spreadsheet_id.or_else(|| cli.spreadsheet_id.clone()),
            api_base_url: file.api_base_url.unwrap_or(defaults.api_base_url),
            log_sheet: file.log_sheet.unwrap_or(defaults.log_sheet),
            log_range: file.log_range.unwrap_or(defaults.log_range),
            identifier_column: file.identifier_column.unwrap_or(defaults.identifier_column),
            results_sheet: file.results_sheet.unwrap_or(defaults.results_sheet),
            results_range: file.results_range.unwrap_or(defaults.results_range),
            progress_range: file.progress_range.unwrap_or(defaults.progress_range),
            timeout_secs: file.timeout_secs.unwrap_or(defaults.timeout_secs),
        }
    }

    /// Whether any collaborator talks to the spreadsheet API.
    pub fn uses_sheets(&self) -> bool {
        self.worklist_file.is_none()
            || self.progress_store == ProgressStoreKind::Sheets
            || self.result_sink == ResultSinkKind::Sheets
    }

    pub fn pipeline_db_path(&self) -> PathBuf {
        self.db_dir.join(crate::pipeline_store::PIPELINE_DB_FILE)
    }
}

fn parse_choice<T: ValueEnum>(field: &str, value: &str) -> Result<T> {
    T::from_str(value, true).map_err(|_| anyhow!("Invalid value {:?} for {}", value, field))
}
