use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use apify_metrics_server::apify::ApifyClient;
use apify_metrics_server::auth::{
    token_provider_from_settings, CLOUD_PLATFORM_SCOPE, SPREADSHEETS_SCOPE,
};
use apify_metrics_server::batch::{
    resume_point, ArmedContinuation, BatchScheduler, EnrichmentClient, ProgressStore, ResultSink,
    ScheduledContinuation, SchedulerSettings, WorklistSource,
};
use apify_metrics_server::config::{
    self, AppConfig, ProgressStoreKind, ResultSinkKind, StartupMode,
};
use apify_metrics_server::continuation::{
    ContinuationQueue, ContinuationTrigger, DispatchCommand, Dispatcher, DispatcherHandle,
    DurableTrigger, RetryPolicy, TaskQueueTrigger, TimerTrigger, TriggerKind,
};
use apify_metrics_server::file_worklist::FileWorklistSource;
use apify_metrics_server::pipeline_store::SqlitePipelineStore;
use apify_metrics_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use apify_metrics_server::sheets::{
    SheetsClient, SheetsProgressStore, SheetsResultSink, SheetsWorklistSource,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the pipeline database.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Number of identifiers per batch.
    #[clap(long)]
    pub batch_size: Option<usize>,

    /// Delay between two batches, in seconds.
    #[clap(long)]
    pub cooldown_secs: Option<u64>,

    /// How the next batch gets triggered.
    #[clap(long, value_enum)]
    pub trigger: Option<TriggerKind>,

    /// What to do with the batch chain at startup.
    #[clap(long, value_enum)]
    pub startup: Option<StartupMode>,

    /// Read identifiers from a local file, one per line, instead of the spreadsheet.
    #[clap(long, value_parser = parse_path)]
    pub worklist_file: Option<PathBuf>,

    #[clap(long, env = "APIFY_API_TOKEN", hide_env_values = true)]
    pub apify_api_token: Option<String>,

    #[clap(long, env = "SPREADSHEET_ID")]
    pub spreadsheet_id: Option<String>,

    #[clap(long, env = "GOOGLE_CLIENT_EMAIL")]
    pub google_client_email: Option<String>,

    #[clap(long, env = "GOOGLE_PRIVATE_KEY", hide_env_values = true)]
    pub google_private_key: Option<String>,

    /// Pre-issued OAuth access token, used instead of the service account.
    #[clap(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub google_access_token: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            batch_size: args.batch_size,
            cooldown_secs: args.cooldown_secs,
            trigger: args.trigger,
            startup: args.startup,
            worklist_file: args.worklist_file.clone(),
            apify_api_token: args.apify_api_token.clone(),
            spreadsheet_id: args.spreadsheet_id.clone(),
            google_client_email: args.google_client_email.clone(),
            google_private_key: args.google_private_key.clone(),
            google_access_token: args.google_access_token.clone(),
        }
    }
}

struct Collaborators {
    worklist: Arc<dyn WorklistSource>,
    enrichment: Arc<dyn EnrichmentClient>,
    sink: Arc<dyn ResultSink>,
    progress: Arc<dyn ProgressStore>,
}

fn build_collaborators(
    app_config: &AppConfig,
    store: &Arc<SqlitePipelineStore>,
) -> Result<Collaborators> {
    let sheets_client = if app_config.uses_sheets() {
        let token_provider =
            token_provider_from_settings(&app_config.google_auth, &[SPREADSHEETS_SCOPE])?;
        let spreadsheet_id = app_config
            .sheets
            .spreadsheet_id
            .as_deref()
            .context("Spreadsheet id is not configured")?;
        Some(Arc::new(SheetsClient::new(
            &app_config.sheets.api_base_url,
            spreadsheet_id,
            token_provider,
            app_config.sheets.timeout_secs,
        )?))
    } else {
        None
    };
    let sheets = || sheets_client.clone().context("Spreadsheet client is not configured");

    let worklist: Arc<dyn WorklistSource> = match &app_config.worklist_file {
        Some(path) => {
            info!("Reading worklist from {:?}", path);
            Arc::new(FileWorklistSource::new(path.clone()))
        }
        None => {
            info!("Reading worklist from {}", app_config.sheets.worklist_range());
            Arc::new(SheetsWorklistSource::new(
                sheets()?,
                app_config.sheets.worklist_range(),
                app_config.sheets.identifier_column,
            ))
        }
    };

    let sink: Arc<dyn ResultSink> = match app_config.result_sink {
        ResultSinkKind::Sheets => Arc::new(SheetsResultSink::new(
            sheets()?,
            app_config.sheets.results_append_range(),
        )),
        ResultSinkKind::Sqlite => store.clone() as Arc<dyn ResultSink>,
    };

    let progress: Arc<dyn ProgressStore> = match app_config.progress_store {
        ProgressStoreKind::Sqlite => store.clone() as Arc<dyn ProgressStore>,
        ProgressStoreKind::Sheets => Arc::new(SheetsProgressStore::new(
            sheets()?,
            app_config.sheets.progress_range.clone(),
        )),
    };

    Ok(Collaborators {
        worklist,
        enrichment: Arc::new(ApifyClient::new(&app_config.apify)?),
        sink,
        progress,
    })
}

fn build_trigger(
    app_config: &AppConfig,
    store: &Arc<SqlitePipelineStore>,
    dispatcher_handle: &DispatcherHandle,
    shutdown_token: &CancellationToken,
) -> Result<Arc<dyn ContinuationTrigger>> {
    let trigger: Arc<dyn ContinuationTrigger> = match app_config.batch.trigger {
        TriggerKind::Timer => Arc::new(TimerTrigger::new(
            dispatcher_handle.clone(),
            shutdown_token.child_token(),
        )),
        TriggerKind::Durable => Arc::new(DurableTrigger::new(
            store.clone() as Arc<dyn ContinuationQueue>,
            dispatcher_handle.clone(),
        )),
        TriggerKind::TaskQueue => {
            let settings = app_config
                .task_queue
                .clone()
                .context("Task queue settings are not configured")?;
            let token_provider =
                token_provider_from_settings(&app_config.google_auth, &[CLOUD_PLATFORM_SCOPE])?;
            Arc::new(TaskQueueTrigger::new(settings, token_provider)?)
        }
    };
    Ok(trigger)
}

/// Where the continuation armed before this start can still be, per trigger.
fn armed_continuation(
    app_config: &AppConfig,
    store: &SqlitePipelineStore,
) -> Result<ArmedContinuation> {
    let armed_at = match app_config.progress_store {
        ProgressStoreKind::Sqlite => store.state_updated_at()?,
        ProgressStoreKind::Sheets => None,
    };
    Ok(match app_config.batch.trigger {
        // Cloud tasks outlive the process.
        TriggerKind::TaskQueue => ArmedContinuation::Pending,
        TriggerKind::Durable if store.pending_count()? > 0 => ArmedContinuation::Pending,
        TriggerKind::Durable | TriggerKind::Timer => ArmedContinuation::Lost { armed_at },
    })
}

/// First continuation to run at startup, if any.
async fn startup_continuation(
    app_config: &AppConfig,
    scheduler: &BatchScheduler,
    store: &SqlitePipelineStore,
) -> Result<Option<ScheduledContinuation>> {
    match app_config.batch.startup {
        StartupMode::None => Ok(None),
        StartupMode::Restart => Ok(Some(ScheduledContinuation::after(0, Duration::ZERO, 0))),
        StartupMode::Resume => {
            let state = match scheduler.progress().await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Could not read progress record, not resuming: {:#}", e);
                    return Ok(None);
                }
            };
            Ok(resume_point(
                state.as_ref(),
                app_config.batch.batch_size,
                armed_continuation(app_config, store)?,
                app_config.batch.cooldown(),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  batch_size: {}", app_config.batch.batch_size);
    info!("  cooldown: {:?}", app_config.batch.cooldown());
    info!("  trigger: {}", app_config.batch.trigger.as_str());

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Opening pipeline database at {:?}",
        app_config.pipeline_db_path()
    );
    let store = Arc::new(SqlitePipelineStore::new(app_config.pipeline_db_path())?);

    let shutdown_token = CancellationToken::new();
    let (dispatcher_handle, dispatcher_receiver) = DispatcherHandle::channel(16);

    let collaborators = build_collaborators(&app_config, &store)?;
    let trigger = build_trigger(&app_config, &store, &dispatcher_handle, &shutdown_token)?;
    let scheduler = Arc::new(BatchScheduler::new(
        SchedulerSettings {
            batch_size: app_config.batch.batch_size,
            cooldown: app_config.batch.cooldown(),
        },
        collaborators.worklist,
        collaborators.enrichment,
        collaborators.sink,
        collaborators.progress,
        trigger,
    ));

    let durable_queue = match app_config.batch.trigger {
        TriggerKind::Durable => Some(store.clone() as Arc<dyn ContinuationQueue>),
        _ => None,
    };
    let mut dispatcher = Dispatcher::new(
        scheduler.clone(),
        &dispatcher_handle,
        dispatcher_receiver,
        durable_queue,
        RetryPolicy::new(&app_config.batch.retry),
        shutdown_token.child_token(),
    );

    if let Some(continuation) = startup_continuation(&app_config, &scheduler, &store).await? {
        let delay = continuation.remaining();
        if delay.is_zero() {
            info!(
                "Starting batch chain at index {}",
                continuation.next_start_index
            );
            dispatcher_handle
                .send(DispatchCommand::Run(continuation))
                .await?;
        } else {
            info!(
                "Resuming batch chain at index {} in {:?}",
                continuation.next_start_index, delay
            );
            scheduler.schedule(&continuation).await?;
        }
    }

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
    };

    // Run HTTP server and dispatcher concurrently
    tokio::select! {
        result = run_server(server_config, scheduler.clone(), shutdown_token.child_token()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = dispatcher.run() => {
            info!("Dispatcher stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give the servers a moment to drain
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
