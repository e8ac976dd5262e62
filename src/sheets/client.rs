use crate::auth::TokenProvider;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Response of `spreadsheets.values.get`. `values` is absent for an empty range.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    pub range: Option<String>,
    pub major_dimension: Option<String>,
    pub values: Option<Vec<Vec<Value>>>,
}

#[derive(Serialize)]
struct ValuesBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<&'a str>,
    values: &'a [Vec<Value>],
}

/// Minimal client for the spreadsheet values API.
pub struct SheetsClient {
    base_url: String,
    spreadsheet_id: String,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl SheetsClient {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        token_provider: Arc<dyn TokenProvider>,
        timeout_sec: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token_provider,
            client,
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(range)
        )
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Sheets {} returned {}: {}", what, status, body);
        }
        Ok(response)
    }

    pub async fn get_values(&self, range: &str) -> Result<ValueRange> {
        let token = self.token_provider.access_token().await?;
        debug!("Reading range {}", range);
        let response = self
            .client
            .get(self.values_url(range))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send values.get request")?;

        Self::check(response, "values.get")
            .await?
            .json::<ValueRange>()
            .await
            .context("Failed to parse values.get response")
    }

    /// Appends rows after the last row of `range`, parsing values as if typed by a user.
    pub async fn append_values(&self, range: &str, rows: &[Vec<Value>]) -> Result<()> {
        let token = self.token_provider.access_token().await?;
        let url = format!(
            "{}:append?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS",
            self.values_url(range)
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&ValuesBody {
                range: None,
                values: rows,
            })
            .send()
            .await
            .context("Failed to send values.append request")?;

        Self::check(response, "values.append").await?;
        Ok(())
    }

    /// Overwrites `range` with `rows`.
    pub async fn update_values(&self, range: &str, rows: &[Vec<Value>]) -> Result<()> {
        let token = self.token_provider.access_token().await?;
        let url = format!("{}?valueInputOption=RAW", self.values_url(range));
        let response = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&ValuesBody {
                range: Some(range),
                values: rows,
            })
            .send()
            .await
            .context("Failed to send values.update request")?;

        Self::check(response, "values.update").await?;
        Ok(())
    }
}

/// Renders a cell as text the way the sheet displays it.
pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}
