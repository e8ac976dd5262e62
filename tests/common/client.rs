//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per service endpoint.
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    /// POST /v1/batch/start, with a JSON body when `start_index` is given
    pub async fn start_batch(&self, start_index: Option<usize>) -> Response {
        let request = self
            .client
            .post(format!("{}/v1/batch/start", self.base_url));
        let request = match start_index {
            Some(start_index) => request.json(&json!({ "start_index": start_index })),
            None => request,
        };
        request.send().await.expect("Start batch request failed")
    }

    pub async fn get_progress(&self) -> Response {
        self.client
            .get(format!("{}/v1/batch/progress", self.base_url))
            .send()
            .await
            .expect("Progress request failed")
    }

    pub async fn process_tweet_metrics(&self) -> Response {
        self.client
            .post(format!("{}/processTweetMetrics", self.base_url))
            .send()
            .await
            .expect("Legacy request failed")
    }
}
