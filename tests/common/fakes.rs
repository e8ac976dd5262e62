//! Test doubles for the external enrichment service

use apify_metrics_server::batch::{EnrichmentClient, EnrichmentRecord, UpstreamError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Returns one record per identifier and remembers every request.
#[derive(Default)]
pub struct FakeEnrichment {
    calls: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
}

impl FakeEnrichment {
    /// Makes every following call fail with a 402 until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrichmentClient for FakeEnrichment {
    async fn fetch(&self, identifiers: &[String]) -> Result<Vec<EnrichmentRecord>, UpstreamError> {
        self.calls.lock().unwrap().push(identifiers.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError {
                status: Some(402),
                body: "usage limit exceeded".to_string(),
            });
        }
        Ok(identifiers
            .iter()
            .map(|id| EnrichmentRecord {
                identifier: id.clone(),
                timestamp: "2024-03-05T10:20:30.000Z".to_string(),
                payload: json!({
                    "id": id,
                    "url": format!("https://x.com/i/status/{id}"),
                    "public_metrics": { "like_count": 3 }
                }),
            })
            .collect())
    }
}
