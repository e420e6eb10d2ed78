//! Rackspace Identity
//!
//! Password-credential authentication with an in-process token cache. The
//! cached token is reused until ten minutes before its server-side expiry;
//! concurrent callers may refresh redundantly, which is harmless.

use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use crate::http::{self, RetryPolicy};

/// Refresh this long before the server-side expiry.
const EXPIRY_MARGIN_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_current(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(EXPIRY_MARGIN_MINUTES) < self.expires_at
    }
}

/// A service account against the identity API.
///
/// One `IdentityAccount` is shared by every client that authenticates with
/// the same user; the token cache lives for the life of the process.
pub struct IdentityAccount {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    username: String,
    password: String,
    domain: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl IdentityAccount {
    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        domain: Option<&str>,
    ) -> Result<Self> {
        Ok(IdentityAccount {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.map(str::to_string),
            cached: Mutex::new(None),
        })
    }

    /// Current token, refreshed when absent or within the expiry margin.
    pub async fn token(&self) -> Result<String> {
        if let Some(cached) = self.cached.lock().expect("identity cache lock").as_ref() {
            if cached.is_current(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        self.refresh().await
    }

    async fn refresh(&self) -> Result<String> {
        let mut auth = json!({
            "passwordCredentials": {
                "username": self.username,
                "password": self.password,
            }
        });
        if let Some(domain) = &self.domain {
            auth["RAX-AUTH:domain"] = json!({ "name": domain });
        }

        let request = self
            .http_client
            .post(format!("{}/v2.0/tokens", self.endpoint))
            .json(&json!({ "auth": auth }));

        let response = http::send_with_retry(request, &self.retry)
            .await
            .context("identity authentication failed")?
            .error_for_status()
            .context("identity authentication failed")?;

        let body: Value = response
            .json()
            .await
            .context("invalid identity token response")?;

        let token = body["access"]["token"]["id"]
            .as_str()
            .context("identity response missing token id")?
            .to_string();
        let expires = body["access"]["token"]["expires"]
            .as_str()
            .context("identity response missing token expiry")?;
        let expires_at = DateTime::parse_from_rfc3339(expires)
            .context("unparseable identity token expiry")?
            .with_timezone(&Utc);

        *self.cached.lock().expect("identity cache lock") = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        info!(username = %self.username, "refreshed identity token");

        Ok(token)
    }
}

/// Validate a token and return the full identity document.
pub async fn validate(client: &Client, endpoint: &str, token: &str) -> Result<Value> {
    let request = client
        .get(format!(
            "{}/v2.0/tokens/{token}",
            endpoint.trim_end_matches('/')
        ))
        .header("x-auth-token", token)
        .header("accept", "application/json");

    let response = http::send_with_retry(request, &RetryPolicy::default()).await?;

    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("token validation failed with {}", response.status());
    }

    response.json().await.context("invalid identity response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str, expires: DateTime<Utc>) -> Value {
        json!({
            "access": {
                "token": { "id": token, "expires": expires.to_rfc3339() }
            }
        })
    }

    #[tokio::test]
    async fn caches_token_until_margin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("tok-1", Utc::now() + Duration::hours(2))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let account = IdentityAccount::new(&server.uri(), "svc", "pw", Some("Rackspace")).unwrap();
        assert_eq!(account.token().await.unwrap(), "tok-1");
        assert_eq!(account.token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn refreshes_inside_margin() {
        let server = MockServer::start().await;
        // Expiry within the ten-minute margin forces a refresh on each access.
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("tok-2", Utc::now() + Duration::minutes(5))),
            )
            .expect(2)
            .mount(&server)
            .await;

        let account = IdentityAccount::new(&server.uri(), "svc", "pw", None).unwrap();
        account.token().await.unwrap();
        account.token().await.unwrap();
    }

    #[tokio::test]
    async fn validate_rejects_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = http::client().unwrap();
        assert!(validate(&client, &server.uri(), "bad-token").await.is_err());
    }
}
