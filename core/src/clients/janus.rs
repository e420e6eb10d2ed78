//! Janus - scoped AWS credentials for tenant accounts.
//!
//! Credentials are cached per AWS account for their 900s lifetime less a
//! small padding; expired entries are evicted on the next lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::aws::Credentials;
use crate::clients::identity::IdentityAccount;
use crate::config::JANUS_TTL;
use crate::http::{self, RetryPolicy};

const EXPIRATION_PADDING_SECS: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JanusCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl From<JanusCredential> for Credentials {
    fn from(credential: JanusCredential) -> Self {
        Credentials {
            access_key_id: credential.access_key_id,
            secret_access_key: credential.secret_access_key,
            session_token: Some(credential.session_token),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedCredential {
    credential: JanusCredential,
    expires: i64,
}

pub struct JanusClient {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    identity: Arc<IdentityAccount>,
    cache: Mutex<HashMap<String, CachedCredential>>,
}

impl JanusClient {
    pub fn new(endpoint: &str, identity: Arc<IdentityAccount>) -> Result<Self> {
        Ok(JanusClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            identity,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub async fn create_aws_account(&self, name: &str) -> Result<serde_json::Value> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .post(format!("{}/v0/awsAccounts", self.endpoint))
            .header("x-auth-token", token)
            .json(&json!({
                "awsAccount": { "name": name, "serviceLevelId": "aws.service_blocks" }
            }));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("janus account creation failed")?;

        response.json().await.context("invalid janus response")
    }

    /// Scoped credentials for `aws_account`, from cache when still live.
    pub async fn get_credentials(
        &self,
        aws_account: &str,
        domain: &str,
    ) -> Result<JanusCredential> {
        if let Some(cached) = self.lookup(aws_account) {
            return Ok(cached);
        }

        let token = self.identity.token().await?;
        let request = self
            .http_client
            .post(format!(
                "{}/v0/awsAccounts/{aws_account}/credentials",
                self.endpoint
            ))
            .header("X-Tenant-Id", domain)
            .header("X-Auth-Token", token)
            .json(&json!({ "credential": { "duration": JANUS_TTL } }));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("janus credential exchange failed")?;

        #[derive(Deserialize)]
        struct CredentialEnvelope {
            credential: JanusCredential,
        }

        let envelope: CredentialEnvelope =
            response.json().await.context("invalid janus response")?;

        let expires = Utc::now().timestamp() + JANUS_TTL - EXPIRATION_PADDING_SECS;
        self.cache.lock().expect("janus cache lock").insert(
            aws_account.to_string(),
            CachedCredential {
                credential: envelope.credential.clone(),
                expires,
            },
        );

        Ok(envelope.credential)
    }

    fn lookup(&self, aws_account: &str) -> Option<JanusCredential> {
        let mut cache = self.cache.lock().expect("janus cache lock");
        match cache.get(aws_account) {
            Some(cached) if cached.expires > Utc::now().timestamp() => {
                Some(cached.credential.clone())
            }
            Some(_) => {
                cache.remove(aws_account);
                None
            }
            None => None,
        }
    }
}
