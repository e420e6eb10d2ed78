//! Azure Resource Manager and the internal MSCloud OAuth service.
//!
//! Both clients hold a bearer token obtained through the client-credentials
//! grant and reuse it while at least one minute of validity remains. The
//! Azure token's lifetime is read from its JWT `exp` claim; MSCloud tokens
//! get a fixed one-hour lifetime.

use std::sync::Mutex;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::http::{self, RetryPolicy};

const TOKEN_MARGIN_SECS: i64 = 60;
const MSCLOUD_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_current(&self) -> bool {
        self.expires_at - Utc::now().timestamp() >= TOKEN_MARGIN_SECS
    }
}

/// Read the `exp` claim of a JWT without verifying its signature. The token
/// came straight from the issuer over TLS; we only need the lifetime.
fn jwt_expiry(token: &str) -> Result<i64> {
    let payload = token
        .split('.')
        .nth(1)
        .context("token is not a JWT")?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .context("invalid JWT payload encoding")?;
    let claims: Value = serde_json::from_slice(&decoded).context("invalid JWT claims")?;
    claims["exp"].as_i64().context("JWT missing exp claim")
}

pub struct AzureClient {
    http_client: Client,
    retry: RetryPolicy,
    login_endpoint: String,
    management_endpoint: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl AzureClient {
    pub fn new(
        login_endpoint: &str,
        management_endpoint: &str,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        Ok(AzureClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            management_endpoint: management_endpoint.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        if let Some(cached) = self.cached.lock().expect("azure token lock").as_ref() {
            if cached.is_current() {
                return Ok(cached.token.clone());
            }
        }

        let request = self
            .http_client
            .post(format!(
                "{}/{}/oauth2/token",
                self.login_endpoint, self.tenant_id
            ))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("resource", "https://management.azure.com/"),
            ]);

        let body: Value = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("azure token request failed")?
            .json()
            .await
            .context("invalid azure token response")?;

        let token = body["access_token"]
            .as_str()
            .context("azure response missing access_token")?
            .to_string();
        let expires_at = jwt_expiry(&token)?;

        *self.cached.lock().expect("azure token lock") = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        info!(tenant = %self.tenant_id, "refreshed azure access token");
        Ok(token)
    }

    /// Run a shell command on a VM and return the `Azure-AsyncOperation`
    /// poll handle. The caller owns the polling cadence.
    pub async fn run_command(&self, vm_location: &str, command: &str) -> Result<String> {
        let token = self.access_token().await?;
        let request = self
            .http_client
            .post(format!(
                "{}{vm_location}/runCommand?api-version=2019-03-01",
                self.management_endpoint
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "commandId": "RunShellScript",
                "script": [command],
            }));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("azure runCommand failed")?;

        response
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .context("azure response missing Azure-AsyncOperation header")
    }

    pub async fn get_async_result(&self, async_url: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let request = self.http_client.get(async_url).bearer_auth(token);

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("azure async poll failed")?
            .json()
            .await
            .context("invalid azure async response")
    }
}

pub struct MsCloudClient {
    http_client: Client,
    retry: RetryPolicy,
    oauth_endpoint: String,
    api_endpoint: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl MsCloudClient {
    pub fn new(
        oauth_endpoint: &str,
        api_endpoint: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self> {
        Ok(MsCloudClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            oauth_endpoint: oauth_endpoint.trim_end_matches('/').to_string(),
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        if let Some(cached) = self.cached.lock().expect("mscloud token lock").as_ref() {
            if cached.is_current() {
                return Ok(cached.token.clone());
            }
        }

        let request = self
            .http_client
            .post(format!("{}/connect/token", self.oauth_endpoint))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "clientapp"),
            ]);

        let body: Value = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("mscloud token request failed")?
            .json()
            .await
            .context("invalid mscloud token response")?;

        let token = body["access_token"]
            .as_str()
            .context("mscloud response missing access_token")?
            .to_string();

        *self.cached.lock().expect("mscloud token lock") = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now().timestamp() + MSCLOUD_TOKEN_TTL_SECS,
        });

        Ok(token)
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let request = self
            .http_client
            .get(format!(
                "{}/subscription/{subscription_id}",
                self.api_endpoint
            ))
            .bearer_auth(token);

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("mscloud subscription lookup failed")?
            .json()
            .await
            .context("invalid mscloud response")
    }
}
