//! Watchman - webhook dispatch/registry service.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;

use crate::clients::identity::IdentityAccount;
use crate::http::{self, RetryPolicy};

pub struct WatchmanClient {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    identity: Arc<IdentityAccount>,
}

impl WatchmanClient {
    pub fn new(endpoint: &str, identity: Arc<IdentityAccount>) -> Result<Self> {
        Ok(WatchmanClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            identity,
        })
    }

    pub async fn get_webhooks(&self, domain: &str, account: &str) -> Result<Vec<Value>> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .get(format!("{}/v1/{account}/webhooks", self.endpoint))
            .header("X-Auth-Token", token)
            .header("X-Tenant-Id", domain);

        let body: Value = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("webhook listing failed")?
            .json()
            .await
            .context("invalid watchman response")?;

        serde_json::from_value(body.get("webhooks").cloned().unwrap_or(Value::Array(vec![])))
            .context("invalid watchman webhook list")
    }

    pub async fn get_webhook(
        &self,
        domain: &str,
        account: &str,
        rel: &str,
    ) -> Result<Option<Value>> {
        let webhooks = self.get_webhooks(domain, account).await?;
        Ok(webhooks.into_iter().find(|webhook| webhook["rel"] == rel))
    }

    /// Resolve the webhook registered under `rel` for the account and POST
    /// the payload to its href.
    pub async fn post_message(
        &self,
        domain: &str,
        account: &str,
        rel: &str,
        payload: &Value,
    ) -> Result<()> {
        let webhook = match self
            .get_webhook(domain, &format!("faws:{account}"), rel)
            .await?
        {
            Some(webhook) => webhook,
            None => bail!("no webhook with name {rel} found for domain {domain}"),
        };

        let path = webhook["href"]
            .as_str()
            .context("webhook entry missing href")?;

        let request = self
            .http_client
            .post(format!("{}{path}", self.endpoint))
            .json(payload);

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("webhook dispatch failed")?;
        Ok(())
    }
}
