//! Recording fakes for the batch collaborators.

use super::*;
use crate::continuation::{ContinuationTrigger, TriggerError, TriggerKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeWorklist {
    items: Mutex<Option<Vec<WorkItem>>>,
}

impl FakeWorklist {
    pub fn with_identifiers(identifiers: &[&str]) -> Self {
        let items = identifiers
            .iter()
            .enumerate()
            .map(|(position, id)| WorkItem::new(position, *id))
            .collect();
        Self {
            items: Mutex::new(Some(items)),
        }
    }

    pub fn numbered(count: usize) -> Self {
        let ids: Vec<String> = (0..count).map(|i| format!("id-{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        Self::with_identifiers(&refs)
    }

    pub fn unavailable() -> Self {
        Self {
            items: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WorklistSource for FakeWorklist {
    async fn read(&self) -> Result<Vec<WorkItem>, SourceUnavailable> {
        self.items
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SourceUnavailable::new("No data found."))
    }
}

#[derive(Default)]
pub struct FakeEnrichment {
    calls: Mutex<Vec<Vec<String>>>,
    failures_left: Mutex<u32>,
}

impl FakeEnrichment {
    pub fn fail_next(&self, times: u32) {
        *self.failures_left.lock().unwrap() = times;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrichmentClient for FakeEnrichment {
    async fn fetch(&self, identifiers: &[String]) -> Result<Vec<EnrichmentRecord>, UpstreamError> {
        self.calls.lock().unwrap().push(identifiers.to_vec());
        let mut failures_left = self.failures_left.lock().unwrap();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(UpstreamError {
                status: Some(503),
                body: "actor unavailable".to_string(),
            });
        }
        Ok(identifiers
            .iter()
            .map(|id| EnrichmentRecord {
                identifier: id.clone(),
                timestamp: "Mon Jan 01 00:00:00 +0000 2024".to_string(),
                payload: serde_json::json!({ "id": id }),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeSink {
    appended: Mutex<Vec<EnrichmentRecord>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeSink {
    pub fn fail_for(&self, identifier: &str) {
        self.failing.lock().unwrap().insert(identifier.to_string());
    }

    pub fn appended(&self) -> Vec<EnrichmentRecord> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for FakeSink {
    async fn append(&self, record: &EnrichmentRecord) -> Result<(), SinkWriteError> {
        if self.failing.lock().unwrap().contains(&record.identifier) {
            return Err(SinkWriteError {
                identifier: record.identifier.clone(),
                reason: "quota exceeded".to_string(),
            });
        }
        self.appended.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProgress {
    writes: Mutex<Vec<BatchState>>,
    failing: Mutex<bool>,
}

impl FakeProgress {
    pub fn fail_writes(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn writes(&self) -> Vec<BatchState> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<BatchState> {
        self.writes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProgressStore for FakeProgress {
    async fn write(&self, state: &BatchState) -> anyhow::Result<()> {
        if *self.failing.lock().unwrap() {
            anyhow::bail!("progress sheet not writable");
        }
        self.writes.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn read(&self) -> anyhow::Result<Option<BatchState>> {
        Ok(self.last())
    }
}

#[derive(Default)]
pub struct RecordingTrigger {
    armed: Mutex<Vec<ScheduledContinuation>>,
    failing: Mutex<bool>,
}

impl RecordingTrigger {
    pub fn fail_arming(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn armed(&self) -> Vec<ScheduledContinuation> {
        self.armed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContinuationTrigger for RecordingTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Timer
    }

    async fn arm(&self, continuation: &ScheduledContinuation) -> Result<(), TriggerError> {
        if *self.failing.lock().unwrap() {
            return Err(TriggerError::Store("disk full".to_string()));
        }
        self.armed.lock().unwrap().push(continuation.clone());
        Ok(())
    }
}

pub struct Harness {
    pub worklist: Arc<FakeWorklist>,
    pub enrichment: Arc<FakeEnrichment>,
    pub sink: Arc<FakeSink>,
    pub progress: Arc<FakeProgress>,
    pub trigger: Arc<RecordingTrigger>,
}

impl Harness {
    pub fn new(worklist: FakeWorklist) -> Self {
        Self {
            worklist: Arc::new(worklist),
            enrichment: Arc::new(FakeEnrichment::default()),
            sink: Arc::new(FakeSink::default()),
            progress: Arc::new(FakeProgress::default()),
            trigger: Arc::new(RecordingTrigger::default()),
        }
    }

    pub fn scheduler(&self, batch_size: usize) -> BatchScheduler {
        self.scheduler_with_trigger(batch_size, Duration::from_secs(960), self.trigger.clone())
    }

    pub fn scheduler_with_trigger(
        &self,
        batch_size: usize,
        cooldown: Duration,
        trigger: Arc<dyn ContinuationTrigger>,
    ) -> BatchScheduler {
        BatchScheduler::new(
            SchedulerSettings {
                batch_size,
                cooldown,
            },
            self.worklist.clone(),
            self.enrichment.clone(),
            self.sink.clone(),
            self.progress.clone(),
            trigger,
        )
    }
}
