use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder written when a batch has no identifier to report.
pub const NO_IDENTIFIER: &str = "N/A";

/// Marker stored in the progress record while a batch is in flight.
pub const STARTING_BATCH_MARKER: &str = "Starting batch...";

/// A single position of the worklist.
///
/// The identifier may be blank: blank items are never sent for enrichment
/// but still occupy their position, so windows never shift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub position: usize,
    pub identifier: String,
}

impl WorkItem {
    pub fn new(position: usize, identifier: impl Into<String>) -> Self {
        Self {
            position,
            identifier: identifier.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.identifier.trim().is_empty()
    }
}

/// Half-open range `[start_index, end_index)` of the worklist handled by one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchWindow {
    pub start_index: usize,
    pub end_index: usize,
}

impl BatchWindow {
    /// Window starting at `start_index`, clamped to the worklist length.
    ///
    /// A start index past the end yields an empty window at `total_items`.
    pub fn new(start_index: usize, total_items: usize, batch_size: usize) -> Self {
        let start_index = start_index.min(total_items);
        let end_index = start_index.saturating_add(batch_size).min(total_items);
        Self {
            start_index,
            end_index,
        }
    }

    pub fn size(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Items of the window, in order, including blank ones.
    pub fn slice<'a>(&self, items: &'a [WorkItem]) -> &'a [WorkItem] {
        &items[self.start_index..self.end_index]
    }
}

/// Number of batches needed to cover `total_items`.
pub fn total_batches(total_items: usize, batch_size: usize) -> usize {
    total_items.div_ceil(batch_size)
}

/// 1-based batch number of the batch starting at `start_index`.
pub fn batch_number(start_index: usize, batch_size: usize) -> usize {
    start_index / batch_size + 1
}

/// Enrichment result for one identifier.
///
/// Only `identifier` and `timestamp` are interpreted by the scheduler; the
/// payload is handed to the result sink as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub identifier: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Processing,
    ScheduledNext,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::ScheduledNext => "SCHEDULED_NEXT",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(BatchStatus::Processing),
            "SCHEDULED_NEXT" => Some(BatchStatus::ScheduledNext),
            "COMPLETED" => Some(BatchStatus::Completed),
            "FAILED" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The progress record: one overwritten snapshot, never a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchState {
    pub status: BatchStatus,
    pub current_batch: usize,
    pub total_batches: usize,
    pub percent_complete: u8,
    pub last_processed_identifier: String,
}

impl BatchState {
    pub fn new(
        status: BatchStatus,
        current_batch: usize,
        total_batches: usize,
        last_processed_identifier: impl Into<String>,
    ) -> Self {
        let current_batch = current_batch.min(total_batches);
        Self {
            status,
            current_batch,
            total_batches,
            percent_complete: percent_complete(current_batch, total_batches),
            last_processed_identifier: last_processed_identifier.into(),
        }
    }
}

/// `round(current / total * 100)`; an empty worklist counts as fully done.
pub fn percent_complete(current_batch: usize, total_batches: usize) -> u8 {
    if total_batches == 0 {
        return 100;
    }
    let ratio = current_batch.min(total_batches) as f64 / total_batches as f64;
    (ratio * 100.0).round() as u8
}

/// A deferred request to run the batch starting at `next_start_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledContinuation {
    pub next_start_index: usize,
    pub fire_at: DateTime<Utc>,
    /// 0 for the regular follow-up batch, N for the N-th retry of a failed window.
    pub attempt: u32,
}

impl ScheduledContinuation {
    pub fn after(next_start_index: usize, delay: std::time::Duration, attempt: u32) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            next_start_index,
            fire_at: Utc::now() + delay,
            attempt,
        }
    }

    /// Time left until the continuation is due, zero if already due.
    pub fn remaining(&self) -> std::time::Duration {
        (self.fire_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Result of one `run_batch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub current_batch: usize,
    pub total_batches: usize,
    pub window: BatchWindow,
    /// Identifiers of the window sent to the enrichment service.
    pub identifiers: Vec<String>,
    /// Records returned by the enrichment service, all of which were handed to the sink.
    pub records_attempted: usize,
    pub records_stored: usize,
    pub continuation: Option<ScheduledContinuation>,
}

impl BatchOutcome {
    pub fn records_failed(&self) -> usize {
        self.records_attempted - self.records_stored
    }
}
