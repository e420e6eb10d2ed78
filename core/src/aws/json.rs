//! Generic client for the AWS JSON wire protocols (`X-Amz-Target` style).

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::debug;

use crate::aws::{sigv4, Credentials};
use crate::http::{self, RetryPolicy};

/// Service-reported failures keep their AWS error code so callers can tell a
/// conditional-write conflict from a missing resource.
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("{code}: {message}")]
    Service { code: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AwsError {
    pub fn is(&self, wanted: &str) -> bool {
        matches!(self, AwsError::Service { code, .. } if code == wanted)
    }
}

pub struct AwsJsonClient {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: Url,
    host: String,
    region: String,
    service: String,
    target_prefix: String,
    content_type: &'static str,
    credentials: Credentials,
}

impl AwsJsonClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        service: &str,
        target_prefix: &str,
        content_type: &'static str,
        credentials: Credentials,
    ) -> Result<Self> {
        let endpoint: Url = endpoint.parse().context("invalid AWS endpoint")?;
        let mut host = endpoint
            .host_str()
            .context("AWS endpoint missing host")?
            .to_string();
        if let Some(port) = endpoint.port() {
            host = format!("{host}:{port}");
        }

        Ok(AwsJsonClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint,
            host,
            region: region.to_string(),
            service: service.to_string(),
            target_prefix: target_prefix.to_string(),
            content_type,
            credentials,
        })
    }

    /// Invoke one operation, returning the decoded response body. Errors the
    /// service reports through `__type` become `AwsError::Service`.
    pub async fn call(&self, operation: &str, body: &Value) -> Result<Value, AwsError> {
        let target = format!("{}.{operation}", self.target_prefix);
        let payload = serde_json::to_vec(body)
            .with_context(|| format!("cannot encode {target} request"))?;

        let signing = sigv4::SigningRequest {
            method: "POST",
            host: &self.host,
            path: "/",
            query: &[],
            headers: &[
                ("content-type", self.content_type),
                ("x-amz-target", &target),
            ],
            payload: &payload,
            region: &self.region,
            service: &self.service,
        };
        let signed = sigv4::sign(&signing, &self.credentials, Utc::now());

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header("Content-Type", self.content_type)
            .header("X-Amz-Target", &target)
            .body(payload);
        for (name, value) in signed {
            request = request.header(name, value);
        }

        debug!(target = %target, service = %self.service, "calling AWS");
        let response = http::send_with_retry(request, &self.retry)
            .await
            .map_err(AwsError::Other)?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("invalid {target} response"))?;

        if status.is_success() {
            return Ok(body);
        }

        // Error shape: {"__type": "namespace#Code", "message": "..."}.
        let code = body["__type"]
            .as_str()
            .map(|full| full.rsplit('#').next().unwrap_or(full).to_string())
            .ok_or_else(|| anyhow!("{target} failed with {status}: {body}"))?;
        let message = body["message"]
            .as_str()
            .or_else(|| body["Message"].as_str())
            .unwrap_or_default()
            .to_string();
        Err(AwsError::Service { code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credentials() -> Credentials {
        Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        }
    }

    #[tokio::test]
    async fn success_bodies_are_returned_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-amz-target", "DynamoDB_20120810.GetItem"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "Item": { "pk": { "S": "a" } } })),
            )
            .mount(&server)
            .await;

        let client = AwsJsonClient::new(
            &server.uri(),
            "us-west-2",
            "dynamodb",
            "DynamoDB_20120810",
            "application/x-amz-json-1.0",
            test_credentials(),
        )
        .unwrap();
        let body = client.call("GetItem", &json!({})).await.unwrap();
        assert_eq!(body["Item"]["pk"]["S"], "a");
    }

    #[tokio::test]
    async fn service_errors_keep_their_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException",
                "message": "The conditional request failed"
            })))
            .mount(&server)
            .await;

        let client = AwsJsonClient::new(
            &server.uri(),
            "us-west-2",
            "dynamodb",
            "DynamoDB_20120810",
            "application/x-amz-json-1.0",
            test_credentials(),
        )
        .unwrap();
        let error = client.call("PutItem", &json!({})).await.unwrap_err();
        assert!(error.is("ConditionalCheckFailedException"));
        assert!(!error.is("ResourceNotFoundException"));
    }
}
