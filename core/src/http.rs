//! Shared HTTP client configuration
//!
//! Every outbound client uses the same timeout and retry policy in case
//! networking or a remote service is having a bad day: five attempts,
//! 0.2 backoff factor, retrying only on the usual transient status codes.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::warn;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared outbound client.
pub fn client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Fixed retry policy applied uniformly to every caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub total: u32,
    pub backoff_factor: f64,
    pub statuses: &'static [u16],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            total: 5,
            backoff_factor: 0.2,
            statuses: &[429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status.as_u16())
    }

    /// Sleep duration before retry `attempt` (1-based), factor * 2^(n-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_factor * f64::from(1u32 << (attempt - 1)))
    }
}

/// Send a request, retrying per `policy` on transport errors and retryable
/// status codes. Requests with streaming bodies cannot be cloned and are
/// sent exactly once.
pub async fn send_with_retry(request: RequestBuilder, policy: &RetryPolicy) -> Result<Response> {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let this_try = match request.try_clone() {
            Some(clone) => clone,
            None => return request.send().await.context("request failed"),
        };

        let outcome = this_try.send().await;

        let retryable = match &outcome {
            Ok(response) => policy.is_retryable(response.status()),
            Err(error) => error.is_connect() || error.is_timeout(),
        };

        if !retryable || attempt >= policy.total {
            return outcome.context("request failed");
        }

        match &outcome {
            Ok(response) => warn!(status = %response.status(), attempt, "retrying request"),
            Err(error) => warn!(%error, attempt, "retrying request"),
        }

        tokio::time::sleep(policy.backoff(attempt)).await;
    }
}
