//! Apify Metrics Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod apify;
pub mod auth;
pub mod batch;
pub mod config;
pub mod continuation;
pub mod file_worklist;
pub mod pipeline_store;
pub mod server;
pub mod sheets;
pub mod sqlite_persistence;

#[cfg(test)]
mod test_http;

// Re-export commonly used types for convenience
pub use batch::{BatchScheduler, SchedulerSettings};
pub use pipeline_store::SqlitePipelineStore;
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
