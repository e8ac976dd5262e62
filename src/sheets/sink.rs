use super::client::SheetsClient;
use crate::batch::{EnrichmentRecord, ResultSink, SinkWriteError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

/// Filler for results-sheet cells with no value.
const PLACEHOLDER_CELL: &str = "N/A";

/// Appends one metrics row per record to the results sheet.
pub struct SheetsResultSink {
    client: Arc<SheetsClient>,
    range: String,
}

impl SheetsResultSink {
    pub fn new(client: Arc<SheetsClient>, range: String) -> Self {
        Self { client, range }
    }
}

fn count(payload: &Value, metric: &str) -> i64 {
    payload["public_metrics"][metric].as_i64().unwrap_or(0)
}

/// Row layout of the results sheet, columns A to L.
pub fn metrics_row(record: &EnrichmentRecord, processed_at: DateTime<Utc>) -> Vec<Value> {
    let payload = &record.payload;
    let url = payload["url"].as_str().unwrap_or_default();
    let created_date = record
        .timestamp
        .split('T')
        .next()
        .unwrap_or_default()
        .to_string();
    let text = payload["text"]
        .as_str()
        .filter(|t| !t.is_empty())
        .unwrap_or(PLACEHOLDER_CELL);

    vec![
        json!(record.timestamp),
        json!(record.identifier),
        json!(url),
        json!(created_date),
        json!(count(payload, "impression_count")),
        json!(count(payload, "like_count")),
        json!(count(payload, "reply_count")),
        json!(count(payload, "retweet_count")),
        json!(PLACEHOLDER_CELL),
        json!(processed_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        json!(url),
        json!(text),
    ]
}

#[async_trait]
impl ResultSink for SheetsResultSink {
    async fn append(&self, record: &EnrichmentRecord) -> Result<(), SinkWriteError> {
        let row = metrics_row(record, Utc::now());
        self.client
            .append_values(&self.range, &[row])
            .await
            .map_err(|e| SinkWriteError {
                identifier: record.identifier.clone(),
                reason: format!("{:#}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::test_http::{spawn_mock, FakeSheets};
    use chrono::TimeZone;

    fn record(payload: Value) -> EnrichmentRecord {
        EnrichmentRecord {
            identifier: "1790000000000000001".to_string(),
            timestamp: "2024-03-05T10:20:30.000Z".to_string(),
            payload,
        }
    }

    #[test]
    fn test_metrics_row_layout() {
        let processed_at = Utc.with_ymd_and_hms(2024, 3, 6, 7, 8, 9).unwrap();
        let row = metrics_row(
            &record(json!({
                "url": "https://x.com/a/status/1790000000000000001",
                "text": "hello",
                "public_metrics": {
                    "impression_count": 1200,
                    "like_count": 14,
                    "reply_count": 2,
                    "retweet_count": 5
                }
            })),
            processed_at,
        );

        assert_eq!(row.len(), 12);
        assert_eq!(row[0], json!("2024-03-05T10:20:30.000Z"));
        assert_eq!(row[1], json!("1790000000000000001"));
        assert_eq!(row[2], json!("https://x.com/a/status/1790000000000000001"));
        assert_eq!(row[3], json!("2024-03-05"));
        assert_eq!(row[4], json!(1200));
        assert_eq!(row[5], json!(14));
        assert_eq!(row[6], json!(2));
        assert_eq!(row[7], json!(5));
        assert_eq!(row[8], json!(PLACEHOLDER_CELL));
        assert_eq!(row[9], json!("2024-03-06 07:08:09"));
        assert_eq!(row[10], row[2]);
        assert_eq!(row[11], json!("hello"));
    }

    #[test]
    fn test_missing_metrics_default_to_zero() {
        let row = metrics_row(&record(json!({})), Utc::now());
        assert_eq!(row[4], json!(0));
        assert_eq!(row[7], json!(0));
        assert_eq!(row[8], json!("N/A"));
        assert_eq!(row[11], json!("N/A"));
    }

    #[tokio::test]
    async fn test_append_failure_names_the_record() {
        let sheets = FakeSheets::default();
        sheets.fail_appends_for("1790000000000000001");
        let base_url = spawn_mock(sheets.router()).await;
        let client = SheetsClient::new(
            &base_url,
            "sheet-1",
            Arc::new(StaticTokenProvider::new("token")),
            5,
        )
        .unwrap();
        let sink = SheetsResultSink::new(Arc::new(client), "PostMetrics!A1:L".to_string());

        let err = sink.append(&record(json!({}))).await.unwrap_err();
        assert_eq!(err.identifier, "1790000000000000001");
        assert!(sheets.appended().is_empty());
    }

    #[tokio::test]
    async fn test_append_writes_one_row() {
        let sheets = FakeSheets::default();
        let base_url = spawn_mock(sheets.router()).await;
        let client = SheetsClient::new(
            &base_url,
            "sheet-1",
            Arc::new(StaticTokenProvider::new("token")),
            5,
        )
        .unwrap();
        let sink = SheetsResultSink::new(Arc::new(client), "PostMetrics!A1:L".to_string());

        sink.append(&record(json!({"text": "hi"}))).await.unwrap();
        let appended = sheets.appended();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].1[0][11], json!("hi"));
    }
}
