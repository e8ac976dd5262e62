use super::schema::PIPELINE_VERSIONED_SCHEMAS;
use crate::batch::{
    BatchState, BatchStatus, EnrichmentRecord, ProgressStore, ResultSink, ScheduledContinuation,
    SinkWriteError,
};
use crate::continuation::{ContinuationQueue, PendingContinuation};
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const STATE_SLOT: i64 = 1;

/// How long claimed continuation rows are kept before being pruned.
const CLAIMED_ROW_RETENTION_HOURS: i64 = 24;

/// Progress record, continuation queue and local result sink in one SQLite file.
pub struct SqlitePipelineStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePipelineStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open pipeline database")?;
        let latest = PIPELINE_VERSIONED_SCHEMAS
            .last()
            .context("No pipeline schema defined")?;

        if is_new_db {
            info!("Creating new pipeline database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version < 1 {
                bail!(
                    "Pipeline database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let schema = PIPELINE_VERSIONED_SCHEMAS
                .iter()
                .find(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown pipeline database version {}", db_version))?;
            schema.validate(&conn).with_context(|| {
                format!(
                    "Pipeline database schema validation failed for version {}",
                    db_version
                )
            })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating pipeline database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut version = from_version;
        for schema in PIPELINE_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            if let Some(migration) = schema.migration {
                migration(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            version = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + version),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Pipeline database lock poisoned"))
    }

    /// Fixed-width UTC format, so stored timestamps compare correctly as text.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_batch_state(row: &rusqlite::Row) -> rusqlite::Result<BatchState> {
        let status_str: String = row.get("status")?;
        let current_batch: i64 = row.get("current_batch")?;
        let total_batches: i64 = row.get("total_batches")?;
        let percent_complete: i64 = row.get("percent_complete")?;

        Ok(BatchState {
            status: BatchStatus::parse(&status_str).unwrap_or(BatchStatus::Failed),
            current_batch: current_batch as usize,
            total_batches: total_batches as usize,
            percent_complete: percent_complete.clamp(0, 100) as u8,
            last_processed_identifier: row.get("last_processed_identifier")?,
        })
    }

    fn row_to_pending(row: &rusqlite::Row) -> rusqlite::Result<PendingContinuation> {
        let next_start_index: i64 = row.get("next_start_index")?;
        let attempt: i64 = row.get("attempt")?;
        let fire_at: String = row.get("fire_at")?;

        Ok(PendingContinuation {
            id: row.get("id")?,
            continuation: ScheduledContinuation {
                next_start_index: next_start_index as usize,
                fire_at: Self::parse_datetime(&fire_at),
                attempt: attempt as u32,
            },
        })
    }

    pub fn write_state(&self, state: &BatchState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO batch_state
                (slot, status, current_batch, total_batches, percent_complete,
                 last_processed_identifier, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(slot) DO UPDATE SET
                status = excluded.status,
                current_batch = excluded.current_batch,
                total_batches = excluded.total_batches,
                percent_complete = excluded.percent_complete,
                last_processed_identifier = excluded.last_processed_identifier,
                updated_at = excluded.updated_at",
            params![
                STATE_SLOT,
                state.status.as_str(),
                state.current_batch as i64,
                state.total_batches as i64,
                state.percent_complete as i64,
                state.last_processed_identifier,
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn read_state(&self) -> Result<Option<BatchState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT status, current_batch, total_batches, percent_complete,
                        last_processed_identifier
                 FROM batch_state WHERE slot = ?1",
                params![STATE_SLOT],
                Self::row_to_batch_state,
            )
            .optional()?;
        Ok(state)
    }

    /// When the progress record was last written.
    pub fn state_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let updated_at: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM batch_state WHERE slot = ?1",
                params![STATE_SLOT],
                |row| row.get(0),
            )
            .optional()?;
        Ok(updated_at.map(|s| Self::parse_datetime(&s)))
    }

    pub fn insert_record(&self, record: &EnrichmentRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO enrichment_records (identifier, timestamp, payload, appended_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.identifier,
                record.timestamp,
                serde_json::to_string(&record.payload)?,
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Stored records in append order.
    pub fn list_records(&self, limit: usize) -> Result<Vec<EnrichmentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT identifier, timestamp, payload FROM enrichment_records
             ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let payload: String = row.get("payload")?;
            Ok(EnrichmentRecord {
                identifier: row.get("identifier")?,
                timestamp: row.get("timestamp")?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl ContinuationQueue for SqlitePipelineStore {
    fn enqueue(&self, continuation: &ScheduledContinuation) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO continuations (next_start_index, attempt, fire_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                continuation.next_start_index as i64,
                continuation.attempt as i64,
                Self::format_datetime(&continuation.fire_at),
                Self::format_datetime(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn next_fire_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let fire_at: Option<String> = conn.query_row(
            "SELECT MIN(fire_at) FROM continuations WHERE claimed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(fire_at.map(|s| Self::parse_datetime(&s)))
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingContinuation>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now_str = Self::format_datetime(&now);

        let due = {
            let mut stmt = tx.prepare(
                "SELECT id, next_start_index, attempt, fire_at FROM continuations
                 WHERE claimed_at IS NULL AND fire_at <= ?1
                 ORDER BY fire_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![now_str], Self::row_to_pending)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut claimed = Vec::with_capacity(due.len());
        for pending in due {
            let changed = tx.execute(
                "UPDATE continuations SET claimed_at = ?1 WHERE id = ?2 AND claimed_at IS NULL",
                params![now_str, pending.id],
            )?;
            if changed == 1 {
                claimed.push(pending);
            }
        }

        let cutoff = now - chrono::Duration::hours(CLAIMED_ROW_RETENTION_HOURS);
        let pruned = tx.execute(
            "DELETE FROM continuations WHERE claimed_at IS NOT NULL AND claimed_at < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        if pruned > 0 {
            debug!("Pruned {} claimed continuations", pruned);
        }
        tx.commit()?;
        Ok(claimed)
    }

    fn pending_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM continuations WHERE claimed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ProgressStore for SqlitePipelineStore {
    async fn write(&self, state: &BatchState) -> Result<()> {
        self.write_state(state)
    }

    async fn read(&self) -> Result<Option<BatchState>> {
        self.read_state()
    }
}

#[async_trait]
impl ResultSink for SqlitePipelineStore {
    async fn append(&self, record: &EnrichmentRecord) -> Result<(), SinkWriteError> {
        self.insert_record(record)
            .map(|_| ())
            .map_err(|e| SinkWriteError {
                identifier: record.identifier.clone(),
                reason: format!("{:#}", e),
            })
    }
}
