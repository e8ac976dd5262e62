use super::collaborators::{EnrichmentClient, ProgressStore, ResultSink, WorklistSource};
use super::error::{BatchError, SchedulingError};
use super::model::*;
use crate::continuation::ContinuationTrigger;
use crate::server::metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub cooldown: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cooldown: Duration::from_secs(16 * 60),
        }
    }
}

/// Runs one batch of the worklist per call and arms the next one.
///
/// Holds no state between batches: everything needed to resume lives in the
/// progress store and in the armed continuation.
pub struct BatchScheduler {
    settings: SchedulerSettings,
    worklist: Arc<dyn WorklistSource>,
    enrichment: Arc<dyn EnrichmentClient>,
    sink: Arc<dyn ResultSink>,
    progress: Arc<dyn ProgressStore>,
    trigger: Arc<dyn ContinuationTrigger>,
}

impl BatchScheduler {
    pub fn new(
        settings: SchedulerSettings,
        worklist: Arc<dyn WorklistSource>,
        enrichment: Arc<dyn EnrichmentClient>,
        sink: Arc<dyn ResultSink>,
        progress: Arc<dyn ProgressStore>,
        trigger: Arc<dyn ContinuationTrigger>,
    ) -> Self {
        let settings = SchedulerSettings {
            batch_size: settings.batch_size.max(1),
            ..settings
        };
        Self {
            settings,
            worklist,
            enrichment,
            sink,
            progress,
            trigger,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Last persisted progress record.
    pub async fn progress(&self) -> Result<Option<BatchState>> {
        self.progress.read().await
    }

    /// Processes the window starting at `start_index`.
    pub async fn run_batch(&self, start_index: usize) -> Result<BatchOutcome, BatchError> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4();
        let result = self
            .execute(start_index)
            .instrument(info_span!("batch_run", %run_id, start_index))
            .await;
        let label = match &result {
            Ok(outcome) => match outcome.status {
                BatchStatus::Completed => "completed",
                _ => "scheduled_next",
            },
            Err(e) => e.kind(),
        };
        metrics::record_batch_run(label, started.elapsed());
        result
    }

    /// Arms `continuation` through the configured trigger.
    pub async fn schedule(&self, continuation: &ScheduledContinuation) -> Result<(), SchedulingError> {
        let kind = self.trigger.kind();
        match self.trigger.arm(continuation).await {
            Ok(()) => {
                metrics::record_continuation_armed(kind.as_str());
                info!(
                    "Armed {} continuation for start index {} (attempt {}) at {}",
                    kind.as_str(),
                    continuation.next_start_index,
                    continuation.attempt,
                    continuation.fire_at.to_rfc3339()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to arm {} continuation for start index {}: {}",
                    kind.as_str(),
                    continuation.next_start_index,
                    e
                );
                Err(SchedulingError {
                    next_start_index: continuation.next_start_index,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn execute(&self, start_index: usize) -> Result<BatchOutcome, BatchError> {
        let items = self.worklist.read().await.inspect_err(|e| {
            error!("Batch at start index {} aborted: {}", start_index, e);
        })?;

        let batch_size = self.settings.batch_size;
        let total_items = items.len();
        let total_batches = total_batches(total_items, batch_size);
        let window = BatchWindow::new(start_index, total_items, batch_size);

        if start_index >= total_items {
            info!(
                "Start index {} is past the end of the worklist ({} items), marking as completed",
                start_index, total_items
            );
            self.write_progress(&BatchState::new(
                BatchStatus::Completed,
                total_batches,
                total_batches,
                NO_IDENTIFIER,
            ))
            .await;
            return Ok(BatchOutcome {
                status: BatchStatus::Completed,
                current_batch: total_batches,
                total_batches,
                window,
                identifiers: vec![],
                records_attempted: 0,
                records_stored: 0,
                continuation: None,
            });
        }

        let current_batch = batch_number(start_index, batch_size);
        let window_items = window.slice(&items);
        let identifiers: Vec<String> = window_items
            .iter()
            .filter(|item| !item.is_blank())
            .map(|item| item.identifier.trim().to_string())
            .collect();
        let last_identifier = identifiers
            .last()
            .cloned()
            .unwrap_or_else(|| NO_IDENTIFIER.to_string());

        info!(
            "Processing batch {}/{}: items [{}, {}) with {} identifiers",
            current_batch,
            total_batches,
            window.start_index,
            window.end_index,
            identifiers.len()
        );
        self.write_progress(&BatchState::new(
            BatchStatus::Processing,
            current_batch,
            total_batches,
            STARTING_BATCH_MARKER,
        ))
        .await;

        let records = if identifiers.is_empty() {
            debug!("Batch {} has only blank identifiers, skipping enrichment", current_batch);
            vec![]
        } else {
            self.enrichment.fetch(&identifiers).await.inspect_err(|e| {
                error!(
                    "Enrichment failed for batch {}/{} at start index {}: {}",
                    current_batch, total_batches, start_index, e
                );
            })?
        };
        debug!("Enrichment returned {} records", records.len());

        let records_stored = self.append_all(&records).await;
        if records_stored < records.len() {
            warn!(
                "Batch {}/{} stored {} of {} records",
                current_batch,
                total_batches,
                records_stored,
                records.len()
            );
        }

        let mut outcome = BatchOutcome {
            status: BatchStatus::Completed,
            current_batch,
            total_batches,
            window,
            identifiers,
            records_attempted: records.len(),
            records_stored,
            continuation: None,
        };

        if window.end_index < total_items {
            let continuation = ScheduledContinuation::after(window.end_index, self.settings.cooldown, 0);
            self.write_progress(&BatchState::new(
                BatchStatus::ScheduledNext,
                current_batch,
                total_batches,
                last_identifier.clone(),
            ))
            .await;
            if let Err(e) = self.schedule(&continuation).await {
                self.write_progress(&BatchState::new(
                    BatchStatus::Failed,
                    current_batch,
                    total_batches,
                    last_identifier,
                ))
                .await;
                return Err(e.into());
            }
            outcome.status = BatchStatus::ScheduledNext;
            outcome.continuation = Some(continuation);
        } else {
            self.write_progress(&BatchState::new(
                BatchStatus::Completed,
                total_batches,
                total_batches,
                last_identifier,
            ))
            .await;
            outcome.current_batch = total_batches;
            info!("All {} batches processed", total_batches);
        }

        Ok(outcome)
    }

    /// Appends every record concurrently, returns how many were stored.
    async fn append_all(&self, records: &[EnrichmentRecord]) -> usize {
        let results = join_all(records.iter().map(|record| self.sink.append(record))).await;
        let mut stored = 0;
        for result in results {
            match result {
                Ok(()) => {
                    stored += 1;
                    metrics::record_sink_append("stored");
                }
                Err(e) => {
                    warn!("Skipping record: {}", e);
                    metrics::record_sink_append("failed");
                }
            }
        }
        stored
    }

    async fn write_progress(&self, state: &BatchState) {
        metrics::set_batch_progress(state.current_batch, state.total_batches);
        if let Err(e) = self.progress.write(state).await {
            error!("Failed to write {} progress record: {:#}", state.status, e);
        }
    }
}

/// What became of the continuation armed before a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmedContinuation {
    /// Held outside this process and still due to fire: a durable row or a cloud task.
    Pending,
    /// Died with the previous process. `armed_at` is when the progress record was
    /// last written, if the progress store keeps that.
    Lost {
        armed_at: Option<DateTime<Utc>>,
    },
}

/// Continuation to start after a restart, given the persisted progress.
///
/// An interrupted batch is re-run from its batch boundary. After an unaligned
/// start index this repeats the items before it, so records may be appended
/// twice (at-least-once).
///
/// A lost SCHEDULED_NEXT continuation keeps its cooldown: it fires at
/// `armed_at + cooldown`, or a full cooldown from now when `armed_at` is unknown.
pub fn resume_point(
    state: Option<&BatchState>,
    batch_size: usize,
    armed: ArmedContinuation,
    cooldown: Duration,
) -> Option<ScheduledContinuation> {
    let state = state?;
    match state.status {
        BatchStatus::Processing | BatchStatus::Failed => Some(ScheduledContinuation::after(
            state.current_batch.saturating_sub(1) * batch_size,
            Duration::ZERO,
            0,
        )),
        BatchStatus::ScheduledNext => match armed {
            ArmedContinuation::Pending => None,
            ArmedContinuation::Lost { armed_at } => {
                let cooldown_chrono =
                    chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
                Some(ScheduledContinuation {
                    next_start_index: state.current_batch * batch_size,
                    fire_at: armed_at.unwrap_or_else(Utc::now) + cooldown_chrono,
                    attempt: 0,
                })
            }
        },
        BatchStatus::Completed => None,
    }
}
