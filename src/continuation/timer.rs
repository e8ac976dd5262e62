use super::{ContinuationTrigger, DispatchCommand, DispatcherHandle, TriggerError, TriggerKind};
use crate::batch::ScheduledContinuation;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sleeps in a background task, then hands the continuation to the dispatcher.
///
/// Nothing is persisted: a restart loses every armed timer.
pub struct TimerTrigger {
    dispatcher: DispatcherHandle,
    shutdown_token: CancellationToken,
}

impl TimerTrigger {
    pub fn new(dispatcher: DispatcherHandle, shutdown_token: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown_token,
        }
    }
}

#[async_trait]
impl ContinuationTrigger for TimerTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Timer
    }

    async fn arm(&self, continuation: &ScheduledContinuation) -> Result<(), TriggerError> {
        if self.dispatcher.is_closed() || self.shutdown_token.is_cancelled() {
            return Err(TriggerError::DispatcherGone);
        }

        let delay = continuation.remaining();
        let continuation = continuation.clone();
        let dispatcher = self.dispatcher.clone();
        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let start_index = continuation.next_start_index;
                    if dispatcher.send(DispatchCommand::Run(continuation)).await.is_err() {
                        warn!("Dropping timer continuation for start index {}: dispatcher stopped", start_index);
                    }
                }
                _ = token.cancelled() => {
                    debug!("Timer for start index {} cancelled", continuation.next_start_index);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (handle, mut receiver) = DispatcherHandle::channel(4);
        let trigger = TimerTrigger::new(handle, CancellationToken::new());

        let continuation = ScheduledContinuation::after(10, Duration::from_secs(960), 0);
        trigger.arm(&continuation).await.unwrap();

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert!(receiver.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(120)).await;
        match receiver.try_recv() {
            Ok(DispatchCommand::Run(fired)) => assert_eq!(fired.next_start_index, 10),
            other => panic!("expected a run command, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (handle, mut receiver) = DispatcherHandle::channel(4);
        let token = CancellationToken::new();
        let trigger = TimerTrigger::new(handle, token.clone());

        trigger
            .arm(&ScheduledContinuation::after(10, Duration::from_secs(60), 0))
            .await
            .unwrap();
        token.cancel();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_arming_fails_without_dispatcher() {
        let (handle, receiver) = DispatcherHandle::channel(4);
        drop(receiver);
        let trigger = TimerTrigger::new(handle, CancellationToken::new());

        let err = trigger
            .arm(&ScheduledContinuation::after(10, Duration::from_secs(60), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::DispatcherGone));
    }
}
