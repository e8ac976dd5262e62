use super::error::{SinkWriteError, SourceUnavailable, UpstreamError};
use super::model::{BatchState, EnrichmentRecord, WorkItem};
use anyhow::Result;
use async_trait::async_trait;

/// Yields the ordered worklist.
#[async_trait]
pub trait WorklistSource: Send + Sync {
    /// Reads the whole worklist. An empty list is a valid answer.
    async fn read(&self) -> Result<Vec<WorkItem>, SourceUnavailable>;
}

/// Fetches enrichment data for a set of identifiers in a single call.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn fetch(&self, identifiers: &[String]) -> Result<Vec<EnrichmentRecord>, UpstreamError>;
}

/// Durable storage for enrichment records, one append per record.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append(&self, record: &EnrichmentRecord) -> Result<(), SinkWriteError>;
}

/// Holder of the single overwritten progress record.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn write(&self, state: &BatchState) -> Result<()>;

    /// Returns the last written record, `None` if nothing was ever written.
    async fn read(&self) -> Result<Option<BatchState>>;
}
