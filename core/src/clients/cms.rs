//! CMS - customer/account management API.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::clients::identity::IdentityAccount;
use crate::http::{self, RetryPolicy};

pub const TYPE_RPCV: &str = "RPC_V";
pub const TYPE_CLOUD: &str = "CLOUD";
pub const STATUS_ACTIVE: &str = "Active";
pub const STATUS_CLOSED: &str = "Closed";
pub const METADATA_CREATION_NAMESPACE: &str = "creation";

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerAccount {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: String,
    pub status: String,
    pub rcn: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdDate")]
    pub created_date: String,
    pub domain: String,
    #[serde(rename = "serviceLevel")]
    pub service_level: Option<String>,
    pub metadata: Option<Value>,
}

pub struct Cms {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    identity: Arc<IdentityAccount>,
}

impl Cms {
    pub fn new(endpoint: &str, identity: Arc<IdentityAccount>) -> Result<Self> {
        Ok(Cms {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            identity,
        })
    }

    pub async fn get_customer_account(
        &self,
        account_type: &str,
        id: &str,
    ) -> Result<Option<CustomerAccount>> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .get(format!(
                "{}/v3/customer_accounts/{account_type}/{id}/detail",
                self.endpoint
            ))
            .header("x-auth-token", token);

        let response = http::send_with_retry(request, &self.retry).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("customer account lookup failed")?;

        Ok(Some(response.json().await.context("invalid CMS response")?))
    }

    pub async fn update_customer_account(
        &self,
        account_type: &str,
        id: &str,
        name: &str,
        status: &str,
        rcn: &str,
    ) -> Result<()> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .put(format!(
                "{}/v3/customer_accounts/{account_type}/{id}",
                self.endpoint
            ))
            .header("x-auth-token", token)
            .json(&json!({
                "id": id,
                "name": name,
                "type": account_type,
                "status": status,
                "rcn": rcn,
            }));

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("customer account update failed")?;
        Ok(())
    }

    pub async fn create_or_update_customer_account_metadata(
        &self,
        account_type: &str,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .put(format!(
                "{}/v3/customer_accounts/{account_type}/{id}/metadata/{key}",
                self.endpoint
            ))
            .header("x-auth-token", token)
            .json(&json!({ "meta": { key: value } }));

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("customer account metadata update failed")?;
        Ok(())
    }

    /// All customer accounts of a type, following the NEXT link marker until
    /// the server stops returning one.
    pub async fn get_customer_accounts(
        &self,
        account_type: &str,
        domain: Option<&str>,
    ) -> Result<Vec<CustomerAccount>> {
        let token = self.identity.token().await?;
        let mut accounts = Vec::new();
        let mut next_id: Option<String> = None;

        loop {
            let marker = next_id.as_ref().map(|id| format!("{account_type}:{id}"));

            let mut params: Vec<(&str, String)> = vec![
                ("accountType", account_type.to_string()),
                ("direction", "backward".to_string()),
            ];
            if let Some(domain) = domain {
                params.push(("domain", domain.to_string()));
            }
            if let Some(marker) = &marker {
                params.push(("marker", marker.clone()));
            }

            let request = self
                .http_client
                .get(format!("{}/v3/customer_accounts", self.endpoint))
                .header("x-auth-token", token.clone())
                .query(&params);

            let response = http::send_with_retry(request, &self.retry)
                .await?
                .error_for_status()
                .context("customer account listing failed")?;

            let page: Value = response.json().await.context("invalid CMS response")?;

            let batch: Vec<CustomerAccount> = serde_json::from_value(
                page.get("customerAccount").cloned().unwrap_or(json!([])),
            )
            .context("invalid customer account page")?;
            debug!(count = batch.len(), "fetched customer account page");
            accounts.extend(batch);

            next_id = next_marker_id(&page);
            if next_id.is_none() {
                return Ok(accounts);
            }
        }
    }

    /// CMS adds the "creation" namespace prefix to metadata keys it stores.
    pub async fn add_customer_account_to_customer(
        &self,
        rcn: &str,
        id: &str,
        name: &str,
        domain: &str,
        account_type: &str,
        metadata: Value,
    ) -> Result<()> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .post(format!(
                "{}/v3/customers/{rcn}/customer_accounts",
                self.endpoint
            ))
            .header("x-auth-token", token)
            .json(&json!({
                "id": id,
                "name": name,
                "rcn": rcn,
                "domain": domain,
                "type": account_type,
                "status": STATUS_ACTIVE,
                "metadata": metadata,
            }));

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("customer account creation failed")?;
        Ok(())
    }
}

/// Pull the id out of the NEXT link's `marker` query parameter, if present.
fn next_marker_id(page: &Value) -> Option<String> {
    let links = page.get("link")?.as_array()?;
    let next = links.iter().find(|link| link["rel"] == "NEXT")?;
    let href = next["href"].as_str()?;

    let query = href.split_once('?')?.1;
    let marker = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("marker="))?;
    let decoded = urlencoding::decode(marker).ok()?;
    Some(decoded.rsplit(':').next()?.to_string())
}
