mod schema;
mod sqlite_pipeline_store;

pub use schema::PIPELINE_VERSIONED_SCHEMAS;
pub use sqlite_pipeline_store::SqlitePipelineStore;

/// File name of the pipeline database inside the configured db dir.
pub const PIPELINE_DB_FILE: &str = "pipeline.db";
