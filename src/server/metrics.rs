use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "apify_metrics";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Batch Metrics
    pub static ref BATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_batches_total"), "Batch runs by outcome"),
        &["outcome"]
    ).expect("Failed to create batches_total metric");

    pub static ref BATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_batch_duration_seconds"),
            "Batch run duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["outcome"]
    ).expect("Failed to create batch_duration_seconds metric");

    pub static ref RECORDS_APPENDED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_records_appended_total"), "Result sink appends by result"),
        &["result"]
    ).expect("Failed to create records_appended_total metric");

    pub static ref CONTINUATIONS_ARMED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_continuations_armed_total"), "Continuations armed by strategy"),
        &["strategy"]
    ).expect("Failed to create continuations_armed_total metric");

    pub static ref CURRENT_BATCH: Gauge = Gauge::new(
        format!("{PREFIX}_current_batch"),
        "Batch number of the last recorded progress"
    ).expect("Failed to create current_batch metric");

    pub static ref TOTAL_BATCHES: Gauge = Gauge::new(
        format!("{PREFIX}_total_batches"),
        "Number of batches in the current worklist"
    ).expect("Failed to create total_batches metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Already-registered errors are expected when tests call this repeatedly
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BATCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RECORDS_APPENDED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CONTINUATIONS_ARMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CURRENT_BATCH.clone()));
    let _ = REGISTRY.register(Box::new(TOTAL_BATCHES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record one batch run, `outcome` being `completed`, `scheduled_next` or an error kind
pub fn record_batch_run(outcome: &str, duration: Duration) {
    BATCHES_TOTAL.with_label_values(&[outcome]).inc();
    BATCH_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn record_sink_append(result: &str) {
    RECORDS_APPENDED_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_continuation_armed(strategy: &str) {
    CONTINUATIONS_ARMED_TOTAL.with_label_values(&[strategy]).inc();
}

pub fn set_batch_progress(current_batch: usize, total_batches: usize) {
    CURRENT_BATCH.set(current_batch as f64);
    TOTAL_BATCHES.set(total_batches as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
