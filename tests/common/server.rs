//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own worklist file and pipeline
//! database, plus a running continuation dispatcher.

use super::constants::*;
use super::fakes::FakeEnrichment;
use apify_metrics_server::batch::{BatchScheduler, SchedulerSettings};
use apify_metrics_server::continuation::{
    ContinuationQueue, Dispatcher, DispatcherHandle, DurableTrigger, RetryPolicy,
};
use apify_metrics_server::file_worklist::FileWorklistSource;
use apify_metrics_server::pipeline_store::SqlitePipelineStore;
use apify_metrics_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct TestServerOptions {
    /// `None` leaves the worklist file missing.
    pub identifiers: Option<Vec<String>>,
    pub batch_size: usize,
    pub cooldown: Duration,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            identifiers: Some(TEST_IDENTIFIERS.iter().map(|s| s.to_string()).collect()),
            batch_size: TEST_BATCH_SIZE,
            cooldown: Duration::from_secs(16 * 60),
        }
    }
}

/// Test server instance backed by a temporary pipeline database
///
/// When dropped, the server and the dispatcher shut down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Pipeline store for direct database access in tests
    pub store: Arc<SqlitePipelineStore>,

    pub enrichment: Arc<FakeEnrichment>,

    pub worklist_path: PathBuf,

    _temp_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a server over the default worklist with a 16 minute cooldown
    pub async fn spawn() -> Self {
        Self::spawn_with(TestServerOptions::default()).await
    }

    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let worklist_path = temp_dir.path().join("worklist.txt");
        if let Some(identifiers) = &options.identifiers {
            std::fs::write(&worklist_path, identifiers.join("\n"))
                .expect("Failed to write worklist file");
        }

        let store = Arc::new(
            SqlitePipelineStore::new(temp_dir.path().join("pipeline.db"))
                .expect("Failed to open pipeline store"),
        );
        let enrichment = Arc::new(FakeEnrichment::default());

        let shutdown_token = CancellationToken::new();
        let (dispatcher_handle, dispatcher_receiver) = DispatcherHandle::channel(16);
        let queue = store.clone() as Arc<dyn ContinuationQueue>;

        let scheduler = Arc::new(BatchScheduler::new(
            SchedulerSettings {
                batch_size: options.batch_size,
                cooldown: options.cooldown,
            },
            Arc::new(FileWorklistSource::new(worklist_path.clone())),
            enrichment.clone(),
            store.clone(),
            store.clone(),
            Arc::new(DurableTrigger::new(queue.clone(), dispatcher_handle.clone())),
        ));

        let mut dispatcher = Dispatcher::new(
            scheduler.clone(),
            &dispatcher_handle,
            dispatcher_receiver,
            Some(queue),
            RetryPolicy::default(),
            shutdown_token.child_token(),
        );
        tokio::spawn(async move { dispatcher.run().await });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let app = make_app(config, scheduler);

        let server_shutdown = shutdown_token.child_token();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            store,
            enrichment,
            worklist_path,
            _temp_dir: temp_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling `/`
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
