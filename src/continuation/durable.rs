use super::{ContinuationTrigger, DispatcherHandle, TriggerError, TriggerKind};
use crate::batch::ScheduledContinuation;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingContinuation {
    pub id: i64,
    pub continuation: ScheduledContinuation,
}

/// Persistent queue of continuations waiting for their fire time.
pub trait ContinuationQueue: Send + Sync {
    fn enqueue(&self, continuation: &ScheduledContinuation) -> Result<i64>;

    /// Earliest fire time among unclaimed continuations.
    fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Marks every continuation due at `now` as claimed and returns them.
    /// A continuation is returned by at most one call.
    fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingContinuation>>;

    fn pending_count(&self) -> Result<usize>;
}

/// Stores the continuation and lets the dispatcher pick it up when due.
///
/// Armed continuations outlive the process and fire on the next start.
pub struct DurableTrigger {
    queue: Arc<dyn ContinuationQueue>,
    dispatcher: DispatcherHandle,
}

impl DurableTrigger {
    pub fn new(queue: Arc<dyn ContinuationQueue>, dispatcher: DispatcherHandle) -> Self {
        Self { queue, dispatcher }
    }
}

#[async_trait]
impl ContinuationTrigger for DurableTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Durable
    }

    async fn arm(&self, continuation: &ScheduledContinuation) -> Result<(), TriggerError> {
        let id = self
            .queue
            .enqueue(continuation)
            .map_err(|e| TriggerError::Store(format!("{:#}", e)))?;
        debug!(
            "Queued continuation {} for start index {}",
            id, continuation.next_start_index
        );
        self.dispatcher.wake();
        Ok(())
    }
}
