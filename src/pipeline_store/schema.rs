//! SQLite schema of the pipeline database.
//!
//! Holds the progress record, the durable continuation queue and, since
//! version 2, the local copy of enrichment records.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Progress record and continuation queue
// =============================================================================

/// Single-row table, the row is always `slot = 1`.
const BATCH_STATE_TABLE_V1: Table = Table {
    name: "batch_state",
    columns: &[
        sqlite_column!("slot", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("current_batch", &SqlType::Integer, non_null = true),
        sqlite_column!("total_batches", &SqlType::Integer, non_null = true),
        sqlite_column!("percent_complete", &SqlType::Integer, non_null = true),
        sqlite_column!("last_processed_identifier", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

const CONTINUATIONS_TABLE_V1: Table = Table {
    name: "continuations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("next_start_index", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "attempt",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("fire_at", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("claimed_at", &SqlType::Text),
    ],
    indices: &[("idx_continuations_pending", "claimed_at, fire_at")],
};

// =============================================================================
// Version 2 - Local result sink
// =============================================================================

const ENRICHMENT_RECORDS_TABLE_V2: Table = Table {
    name: "enrichment_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("identifier", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("appended_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_enrichment_records_identifier", "identifier")],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    ENRICHMENT_RECORDS_TABLE_V2.create(conn)
}

pub const PIPELINE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[BATCH_STATE_TABLE_V1, CONTINUATIONS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            BATCH_STATE_TABLE_V1,
            CONTINUATIONS_TABLE_V1,
            ENRICHMENT_RECORDS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
