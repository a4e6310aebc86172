//! Outbound HTTP: task dispatch (single attempt) and evaluator notification (retried).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Attachment, Task};

/// Backoff between notify attempts; later attempts reuse the last entry.
pub const RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
];

/// Delay after failed attempt `attempt` (0-based).
pub fn retry_delay(attempt: usize) -> Duration {
    RETRY_DELAYS[attempt.min(RETRY_DELAYS.len() - 1)]
}

/// Task sent to a submitter's deploy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub email: String,
    pub secret: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TaskRequest {
    pub fn new(task: &Task, email: &str, secret: &str, nonce: &str, evaluation_url: &str) -> Self {
        Self {
            email: email.to_string(),
            secret: secret.to_string(),
            task: task.task_id.clone(),
            round: task.round,
            nonce: nonce.to_string(),
            brief: task.brief.clone(),
            checks: task.wire_checks(),
            evaluation_url: evaluation_url.to_string(),
            attachments: task.attachments.clone(),
        }
    }
}

/// JSON POST transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` and return the HTTP status. Transport failures are errors.
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> anyhow::Result<u16>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> anyhow::Result<u16> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// POST once. `None` when the request never produced a status.
pub async fn send<T: Serialize>(
    transport: &dyn Transport,
    endpoint: &str,
    payload: &T,
    timeout: Duration,
) -> Option<u16> {
    let body = match serde_json::to_value(payload) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Failed to encode payload for {}: {}", endpoint, e);
            return None;
        }
    };

    match transport.post_json(endpoint, &body, timeout).await {
        Ok(status) => {
            tracing::debug!("POST {} -> {}", endpoint, status);
            Some(status)
        }
        Err(e) => {
            tracing::warn!("POST {} failed: {}", endpoint, e);
            None
        }
    }
}

/// Result of `notify_with_retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    /// Delays actually slept, in order
    pub delays: Vec<Duration>,
    pub last_status: Option<u16>,
}

/// POST until a 200 arrives or `max_attempts` are used.
///
/// Never fails: exhaustion is reported through `delivered = false`.
pub async fn notify_with_retry<T: Serialize>(
    transport: &dyn Transport,
    url: &str,
    payload: &T,
    max_attempts: u32,
    timeout: Duration,
) -> DeliveryReport {
    let mut report = DeliveryReport {
        delivered: false,
        attempts: 0,
        delays: Vec::new(),
        last_status: None,
    };

    for attempt in 0..max_attempts.max(1) {
        report.attempts += 1;
        report.last_status = send(transport, url, payload, timeout).await;

        if report.last_status == Some(200) {
            tracing::info!("Notified {} on attempt {}", url, attempt + 1);
            report.delivered = true;
            return report;
        }

        if attempt + 1 < max_attempts {
            let delay = retry_delay(attempt as usize);
            tracing::warn!(
                "Notify attempt {} to {} got {:?}, retrying in {:?}",
                attempt + 1,
                url,
                report.last_status,
                delay
            );
            tokio::time::sleep(delay).await;
            report.delays.push(delay);
        }
    }

    tracing::error!("Giving up on {} after {} attempts", url, report.attempts);
    report
}
