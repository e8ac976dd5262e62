use super::client::{cell_text, SheetsClient};
use crate::batch::{SourceUnavailable, WorkItem, WorklistSource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Reads identifiers from one column of the log sheet.
pub struct SheetsWorklistSource {
    client: Arc<SheetsClient>,
    range: String,
    identifier_column: usize,
}

impl SheetsWorklistSource {
    pub fn new(client: Arc<SheetsClient>, range: String, identifier_column: usize) -> Self {
        Self {
            client,
            range,
            identifier_column,
        }
    }
}

#[async_trait]
impl WorklistSource for SheetsWorklistSource {
    async fn read(&self) -> Result<Vec<WorkItem>, SourceUnavailable> {
        let response = self
            .client
            .get_values(&self.range)
            .await
            .map_err(|e| SourceUnavailable::new(format!("{:#}", e)))?;

        let rows = response
            .values
            .ok_or_else(|| SourceUnavailable::new(format!("No data found in {}", self.range)))?;

        let items: Vec<WorkItem> = rows
            .iter()
            .enumerate()
            .map(|(position, row)| {
                let identifier = row
                    .get(self.identifier_column)
                    .map(cell_text)
                    .unwrap_or_default();
                WorkItem::new(position, identifier)
            })
            .collect();
        debug!("Read {} worklist rows from {}", items.len(), self.range);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::test_http::{spawn_mock, FakeSheets};
    use serde_json::json;

    async fn source_for(sheets: &FakeSheets) -> SheetsWorklistSource {
        let base_url = spawn_mock(sheets.router()).await;
        let client = SheetsClient::new(
            &base_url,
            "sheet-1",
            Arc::new(StaticTokenProvider::new("token")),
            5,
        )
        .unwrap();
        SheetsWorklistSource::new(Arc::new(client), "Log!A2:D".to_string(), 3)
    }

    #[tokio::test]
    async fn test_short_rows_keep_their_position() {
        let sheets = FakeSheets::default();
        sheets.set_range(
            "Log!A2:D",
            vec![
                vec![json!("2024-01-01"), json!("x"), json!("y"), json!("111")],
                vec![json!("2024-01-02")],
                vec![json!("2024-01-03"), json!(""), json!(""), json!(333)],
            ],
        );
        let source = source_for(&sheets).await;

        let items = source.read().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].identifier, "111");
        assert!(items[1].is_blank());
        assert_eq!(items[1].position, 1);
        assert_eq!(items[2].identifier, "333");
    }

    #[tokio::test]
    async fn test_missing_values_is_unavailable() {
        let sheets = FakeSheets::default();
        let source = source_for(&sheets).await;

        let err = source.read().await.unwrap_err();
        assert!(err.reason.contains("No data found"));
    }

    #[tokio::test]
    async fn test_unreachable_sheet_is_unavailable() {
        let client = SheetsClient::new(
            "http://127.0.0.1:1",
            "sheet-1",
            Arc::new(StaticTokenProvider::new("token")),
            1,
        )
        .unwrap();
        let source = SheetsWorklistSource::new(Arc::new(client), "Log!A2:D".to_string(), 3);
        assert!(source.read().await.is_err());
    }
}
