//! Strategies that turn a [`ScheduledContinuation`] into a later batch run.
//!
//! `timer` and `durable` hand work to the in-process [`dispatcher::Dispatcher`];
//! `task_queue` delegates to an external HTTP task queue that calls back into
//! the batch endpoint.

mod dispatcher;
mod durable;
mod retry;
mod task_queue;
mod timer;

pub use dispatcher::{DispatchCommand, Dispatcher, DispatcherHandle};
pub use durable::{ContinuationQueue, DurableTrigger, PendingContinuation};
pub use retry::RetryPolicy;
pub use task_queue::{TaskQueueSettings, TaskQueueTrigger};
pub use timer::TimerTrigger;

use crate::batch::ScheduledContinuation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("continuation dispatcher is not running")]
    DispatcherGone,
    #[error("failed to persist continuation: {0}")]
    Store(String),
    #[error("task queue rejected continuation with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("task queue request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// In-process timer, lost on restart.
    Timer,
    /// Row in the local SQLite queue, survives restarts.
    Durable,
    /// Task posted to an external HTTP task queue.
    #[value(name = "task_queue")]
    TaskQueue,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Timer => "timer",
            TriggerKind::Durable => "durable",
            TriggerKind::TaskQueue => "task_queue",
        }
    }
}

/// Arranges for `run_batch(next_start_index)` to happen at `fire_at`.
#[async_trait]
pub trait ContinuationTrigger: Send + Sync {
    fn kind(&self) -> TriggerKind;

    /// Returns once the continuation is armed. Errors mean nothing will fire.
    async fn arm(&self, continuation: &ScheduledContinuation) -> Result<(), TriggerError>;
}
