//! Resumable batch processing of the worklist.

mod collaborators;
mod error;
mod model;
mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use collaborators::{EnrichmentClient, ProgressStore, ResultSink, WorklistSource};
pub use error::{BatchError, SchedulingError, SinkWriteError, SourceUnavailable, UpstreamError};
pub use model::*;
pub use scheduler::{resume_point, ArmedContinuation, BatchScheduler, SchedulerSettings};
