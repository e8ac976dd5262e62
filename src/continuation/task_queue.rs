use super::{ContinuationTrigger, TriggerError, TriggerKind};
use crate::auth::TokenProvider;
use crate::batch::ScheduledContinuation;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::SecondsFormat;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueSettings {
    /// Tasks collection the task is created in.
    pub queue_url: String,
    /// URL the queue calls when the task fires.
    pub target_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    task: Task,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Task {
    schedule_time: String,
    http_request: HttpRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    http_method: &'static str,
    url: String,
    headers: std::collections::BTreeMap<&'static str, &'static str>,
    /// Base64 of the JSON request body.
    body: String,
}

/// Creates a task on an external queue that POSTs the start index back to us.
pub struct TaskQueueTrigger {
    settings: TaskQueueSettings,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl TaskQueueTrigger {
    pub fn new(
        settings: TaskQueueSettings,
        token_provider: Arc<dyn TokenProvider>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            settings,
            token_provider,
            client,
        })
    }

    fn build_request(&self, continuation: &ScheduledContinuation) -> CreateTaskRequest {
        let payload = serde_json::json!({ "start_index": continuation.next_start_index });
        let mut headers = std::collections::BTreeMap::new();
        headers.insert("Content-Type", "application/json");
        CreateTaskRequest {
            task: Task {
                schedule_time: continuation
                    .fire_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                http_request: HttpRequest {
                    http_method: "POST",
                    url: self.settings.target_url.clone(),
                    headers,
                    body: STANDARD.encode(payload.to_string()),
                },
            },
        }
    }
}

#[async_trait]
impl ContinuationTrigger for TaskQueueTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::TaskQueue
    }

    async fn arm(&self, continuation: &ScheduledContinuation) -> Result<(), TriggerError> {
        let token = self
            .token_provider
            .access_token()
            .await
            .map_err(|e| TriggerError::Transport(format!("{:#}", e)))?;

        let response = self
            .client
            .post(&self.settings.queue_url)
            .bearer_auth(token)
            .json(&self.build_request(continuation))
            .send()
            .await
            .map_err(|e| TriggerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(
            "Task queue accepted continuation for start index {}",
            continuation.next_start_index
        );
        Ok(())
    }
}
