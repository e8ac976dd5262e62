use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::metrics::metrics_handler;
use super::state::{GuardedBatchScheduler, ServerState};
use super::{log_requests, ServerConfig};
use crate::batch::{BatchError, BatchOutcome, BatchStatus};

const WELCOME_TEXT: &str = "Welcome! This is the Apify Metrics Service.";
const LEGACY_COMPLETED_TEXT: &str = "Tweet metrics processing completed";

#[derive(Deserialize, Debug, Default)]
struct StartBatchBody {
    pub start_index: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct StartBatchQuery {
    pub start_index: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct BatchRunResponse {
    pub current_batch: usize,
    pub total_batches: usize,
    pub status: BatchStatus,
    pub start_index: usize,
    pub end_index: usize,
    pub records_attempted: usize,
    pub records_stored: usize,
    pub next_start_index: Option<usize>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl From<&BatchOutcome> for BatchRunResponse {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            current_batch: outcome.current_batch,
            total_batches: outcome.total_batches,
            status: outcome.status,
            start_index: outcome.window.start_index,
            end_index: outcome.window.end_index,
            records_attempted: outcome.records_attempted,
            records_stored: outcome.records_stored,
            next_start_index: outcome.continuation.as_ref().map(|c| c.next_start_index),
            next_fire_at: outcome.continuation.as_ref().map(|c| c.fire_at),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct BatchErrorResponse {
    pub error: String,
    pub start_index: usize,
}

fn error_status(err: &BatchError) -> StatusCode {
    match err {
        BatchError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BatchError::Upstream(_) => StatusCode::BAD_GATEWAY,
        BatchError::Scheduling(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn home() -> impl IntoResponse {
    WELCOME_TEXT
}

/// Runs one batch. The start index comes from the JSON body, then the query, then 0.
async fn start_batch(
    State(scheduler): State<GuardedBatchScheduler>,
    Query(query): Query<StartBatchQuery>,
    body: Bytes,
) -> Response {
    let body: StartBatchBody = if body.iter().all(u8::is_ascii_whitespace) {
        StartBatchBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(err) => {
                return (StatusCode::BAD_REQUEST, format!("Invalid body: {}", err)).into_response()
            }
        }
    };
    let start_index = body.start_index.or(query.start_index).unwrap_or(0);

    match scheduler.run_batch(start_index).await {
        Ok(outcome) => Json(BatchRunResponse::from(&outcome)).into_response(),
        Err(err) => {
            error!("Batch starting at {} failed: {}", start_index, err);
            (
                error_status(&err),
                Json(BatchErrorResponse {
                    error: err.to_string(),
                    start_index,
                }),
            )
                .into_response()
        }
    }
}

async fn get_progress(State(scheduler): State<GuardedBatchScheduler>) -> Response {
    match scheduler.progress().await {
        Ok(Some(state)) => Json(state).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", err)).into_response(),
    }
}

async fn process_tweet_metrics(State(scheduler): State<GuardedBatchScheduler>) -> Response {
    match scheduler.run_batch(0).await {
        Ok(_) => (StatusCode::OK, LEGACY_COMPLETED_TEXT).into_response(),
        Err(err) => {
            error!("Error in tweet metrics processing: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", err)).into_response()
        }
    }
}

pub fn make_app(config: ServerConfig, scheduler: GuardedBatchScheduler) -> Router {
    let state = ServerState::new(config, scheduler);

    let batch_routes: Router = Router::new()
        .route("/start", post(start_batch))
        .route("/progress", get(get_progress))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .route("/processTweetMetrics", post(process_tweet_metrics))
        .with_state(state.clone())
        .nest("/v1/batch", batch_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    scheduler: GuardedBatchScheduler,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, scheduler);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let api_shutdown = shutdown.clone();
    let api = axum::serve(listener, app)
        .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
    let metrics = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    tokio::try_join!(api.into_future(), metrics.into_future())?;
    Ok(())
}
