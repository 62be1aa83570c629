//! API-service egress interface (§6): the controller pushes status
//! updates and security events to the API service and asks it to
//! allocate/release warm pods across pools it tracks centrally. Bounded
//! retry with exponential backoff, same shape as `queue::Dispatcher`'s
//! backoff but applied to outbound HTTP instead of reconcile scheduling.

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize)]
pub struct StatusPush<'a> {
    pub sandbox_id: &'a str,
    pub phase: &'a str,
    pub endpoint: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct SecurityEvent<'a> {
    pub sandbox_id: &'a str,
    pub kind: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AllocationStats {
    pub pool: String,
    pub available: u32,
    pub assigned: u32,
    pub pending: u32,
}

pub struct ApiServiceClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl ApiServiceClient {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), bearer_token: bearer_token.into() }
    }

    pub async fn push_status(&self, push: &StatusPush<'_>) -> Result<(), reqwest::Error> {
        self.post_with_retry("/v1/sandboxes/status", push).await
    }

    pub async fn report_security_event(&self, event: &SecurityEvent<'_>) -> Result<(), reqwest::Error> {
        self.post_with_retry("/v1/security-events", event).await
    }

    pub async fn report_pool_stats(&self, stats: &AllocationStats) -> Result<(), reqwest::Error> {
        self.post_with_retry("/v1/warm-pools/stats", stats).await
    }

    async fn post_with_retry<T: Serialize>(&self, path: &str, body: &T) -> Result<(), reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.bearer_token)
                .json(body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(_) => return Ok(()),
                Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!(attempt, path, error = %err, "api-service request failed, retrying");
                    sleep(BASE_DELAY * 2u32.pow(attempt.min(8))).await;
                }
            }
        }
    }
}
