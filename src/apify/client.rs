use super::models::{item_to_record, ActorInput};
use crate::batch::{EnrichmentClient, EnrichmentRecord, UpstreamError};
use crate::config::ApifySettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Runs the scraper actor synchronously and returns its dataset items.
pub struct ApifyClient {
    actor_url: String,
    api_token: String,
    client: reqwest::Client,
}

impl ApifyClient {
    pub fn new(settings: &ApifySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            actor_url: settings.actor_url.clone(),
            api_token: settings.api_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl EnrichmentClient for ApifyClient {
    async fn fetch(&self, identifiers: &[String]) -> Result<Vec<EnrichmentRecord>, UpstreamError> {
        info!("Fetching metrics for {} identifiers", identifiers.len());
        let response = self
            .client
            .post(&self.actor_url)
            .bearer_auth(&self.api_token)
            .json(&ActorInput::latest(identifiers))
            .send()
            .await
            .map_err(UpstreamError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError {
                status: Some(status.as_u16()),
                body,
            });
        }

        let items: Vec<Value> = response.json().await.map_err(|e| UpstreamError {
            status: Some(status.as_u16()),
            body: format!("invalid dataset response: {}", e),
        })?;
        let item_count = items.len();
        let records: Vec<EnrichmentRecord> = items.into_iter().filter_map(item_to_record).collect();
        if records.len() < item_count {
            debug!("Dropped {} dataset items without id", item_count - records.len());
        }
        Ok(records)
    }
}
