use super::client::{cell_text, SheetsClient};
use crate::batch::{percent_complete, BatchState, BatchStatus, ProgressStore};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Keeps the progress record in a fixed one-row range of the spreadsheet.
pub struct SheetsProgressStore {
    client: Arc<SheetsClient>,
    range: String,
}

impl SheetsProgressStore {
    pub fn new(client: Arc<SheetsClient>, range: String) -> Self {
        Self { client, range }
    }
}

fn parse_row(row: &[serde_json::Value]) -> Option<BatchState> {
    let cell = |i: usize| row.get(i).map(cell_text).unwrap_or_default();
    let status = BatchStatus::parse(&cell(0))?;
    let current_batch = cell(1).parse().ok()?;
    let total_batches = cell(2).parse().ok()?;
    let percent = cell(3)
        .trim_end_matches('%')
        .parse()
        .unwrap_or_else(|_| percent_complete(current_batch, total_batches));
    Some(BatchState {
        status,
        current_batch,
        total_batches,
        percent_complete: percent,
        last_processed_identifier: cell(4),
    })
}

#[async_trait]
impl ProgressStore for SheetsProgressStore {
    async fn write(&self, state: &BatchState) -> Result<()> {
        let row = vec![
            json!(state.status.as_str()),
            json!(state.current_batch),
            json!(state.total_batches),
            json!(state.percent_complete),
            json!(state.last_processed_identifier),
        ];
        self.client.update_values(&self.range, &[row]).await
    }

    async fn read(&self) -> Result<Option<BatchState>> {
        let response = self.client.get_values(&self.range).await?;
        Ok(response
            .values
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| parse_row(&row)))
    }
}
