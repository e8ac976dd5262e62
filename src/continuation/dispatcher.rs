use super::{ContinuationQueue, RetryPolicy, TriggerError};
use crate::batch::{BatchScheduler, ScheduledContinuation};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps without looking at the queue.
const MAX_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum DispatchCommand {
    /// Run the batch at `next_start_index` now.
    Run(ScheduledContinuation),
}

/// Cloneable sender side of the dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatchCommand>,
    wakeup: Arc<Notify>,
}

impl DispatcherHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DispatchCommand>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                sender,
                wakeup: Arc::new(Notify::new()),
            },
            receiver,
        )
    }

    pub async fn send(&self, command: DispatchCommand) -> Result<(), TriggerError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| TriggerError::DispatcherGone)
    }

    /// Makes the loop re-read the durable queue.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Executes timer commands and due durable continuations, one batch at a time.
pub struct Dispatcher {
    scheduler: Arc<BatchScheduler>,
    queue: Option<Arc<dyn ContinuationQueue>>,
    command_receiver: mpsc::Receiver<DispatchCommand>,
    wakeup: Arc<Notify>,
    retry_policy: RetryPolicy,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        scheduler: Arc<BatchScheduler>,
        handle: &DispatcherHandle,
        command_receiver: mpsc::Receiver<DispatchCommand>,
        queue: Option<Arc<dyn ContinuationQueue>>,
        retry_policy: RetryPolicy,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            queue,
            command_receiver,
            wakeup: handle.wakeup.clone(),
            retry_policy,
            shutdown_token,
        }
    }

    /// Main dispatcher loop.
    pub async fn run(&mut self) {
        info!(
            "Starting continuation dispatcher (durable queue: {})",
            self.queue.is_some()
        );

        loop {
            self.run_due_continuations().await;

            let sleep_duration = self.time_until_next_due();
            debug!("Dispatcher sleeping for {:?}", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {}
                _ = self.wakeup.notified() => {
                    debug!("Dispatcher woken up");
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }
            }
        }

        info!("Continuation dispatcher stopped");
    }

    async fn handle_command(&self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Run(continuation) => self.run_continuation(continuation).await,
        }
    }

    async fn run_due_continuations(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        let due = match queue.claim_due(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to claim due continuations: {:#}", e);
                return;
            }
        };
        for pending in due {
            if self.shutdown_token.is_cancelled() {
                break;
            }
            debug!("Claimed continuation {}", pending.id);
            self.run_continuation(pending.continuation).await;
        }
    }

    fn time_until_next_due(&self) -> Duration {
        let Some(queue) = &self.queue else {
            return MAX_IDLE;
        };
        match queue.next_fire_at() {
            Ok(Some(fire_at)) => (fire_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_IDLE),
            Ok(None) => MAX_IDLE,
            Err(e) => {
                warn!("Failed to read next continuation time: {:#}", e);
                MAX_IDLE
            }
        }
    }

    async fn run_continuation(&self, continuation: ScheduledContinuation) {
        let start_index = continuation.next_start_index;
        info!(
            "Running continuation for start index {} (attempt {})",
            start_index, continuation.attempt
        );

        match self.scheduler.run_batch(start_index).await {
            Ok(outcome) => {
                debug!(
                    "Continuation for start index {} finished with {}",
                    start_index, outcome.status
                );
            }
            Err(e) if e.is_retryable() => {
                if !self.retry_policy.should_retry(continuation.attempt) {
                    error!(
                        "Giving up on start index {} after {} attempts: {}",
                        start_index,
                        continuation.attempt + 1,
                        e
                    );
                    return;
                }
                let delay = self.retry_policy.backoff(continuation.attempt);
                warn!(
                    "Batch at start index {} failed ({}), retrying in {:?}",
                    start_index, e, delay
                );
                let retry =
                    ScheduledContinuation::after(start_index, delay, continuation.attempt + 1);
                if let Err(e) = self.scheduler.schedule(&retry).await {
                    error!("Batch chain stopped at start index {}: {}", start_index, e);
                }
            }
            Err(e) => {
                error!("Batch chain stopped at start index {}: {}", start_index, e);
            }
        }
    }
}
