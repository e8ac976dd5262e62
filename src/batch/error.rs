use thiserror::Error;

/// The worklist could not be read at all.
///
/// An empty but readable worklist is not an error.
#[derive(Debug, Clone, Error)]
#[error("worklist source unavailable: {reason}")]
pub struct SourceUnavailable {
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The enrichment service call failed as a whole.
///
/// `status` is `None` when the request never produced an HTTP response.
#[derive(Debug, Clone, Error)]
#[error("enrichment service error (status {}): {body}", status_label(.status))]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub body: String,
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl UpstreamError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self {
            status: None,
            body: err.to_string(),
        }
    }
}

/// A single record could not be appended to the result sink.
#[derive(Debug, Clone, Error)]
#[error("failed to append record {identifier}: {reason}")]
pub struct SinkWriteError {
    pub identifier: String,
    pub reason: String,
}

/// The continuation for the next batch could not be armed.
#[derive(Debug, Clone, Error)]
#[error("failed to arm continuation for start index {next_start_index}: {reason}")]
pub struct SchedulingError {
    pub next_start_index: usize,
    pub reason: String,
}

/// Errors that stop a batch and are surfaced to whoever triggered it.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceUnavailable),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl BatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::SourceUnavailable(_) => "source_unavailable",
            BatchError::Upstream(_) => "upstream_error",
            BatchError::Scheduling(_) => "scheduling_error",
        }
    }

    /// Whether running the same start index again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::Upstream(_))
    }
}
