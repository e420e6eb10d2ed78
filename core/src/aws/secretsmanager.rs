//! Secrets Manager over its JSON protocol.

use serde_json::{json, Value};
use tracing::info;

use crate::aws::{AwsError, AwsJsonClient, Credentials};

pub struct SecretsClient {
    inner: AwsJsonClient,
}

impl SecretsClient {
    pub fn new(endpoint: &str, region: &str, credentials: Credentials) -> Result<Self, AwsError> {
        Ok(SecretsClient {
            inner: AwsJsonClient::new(
                endpoint,
                region,
                "secretsmanager",
                "secretsmanager",
                "application/x-amz-json-1.1",
                credentials,
            )?,
        })
    }

    /// Create a secret, overwriting its value if it already exists.
    pub async fn create_secret(&self, name: &str, value: &str) -> Result<(), AwsError> {
        let body = json!({ "Name": name, "SecretString": value });
        match self.inner.call("CreateSecret", &body).await {
            Ok(_) => Ok(()),
            Err(error) if error.is("ResourceExistsException") => {
                info!(name, "secret exists, updating instead");
                self.update_secret(name, value).await
            }
            Err(error) => Err(error),
        }
    }

    pub async fn update_secret(&self, name: &str, value: &str) -> Result<(), AwsError> {
        let body = json!({ "SecretId": name, "SecretString": value });
        self.inner.call("UpdateSecret", &body).await?;
        Ok(())
    }

    /// Current secret string; `None` when the secret does not exist.
    pub async fn get_secret_value(&self, name: &str) -> Result<Option<String>, AwsError> {
        let body = json!({ "SecretId": name });
        match self.inner.call("GetSecretValue", &body).await {
            Ok(response) => Ok(response["SecretString"].as_str().map(str::to_string)),
            Err(error) if error.is("ResourceNotFoundException") => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Names of every secret in the account, following `NextToken`.
    pub async fn list_secrets(&self) -> Result<Vec<String>, AwsError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({ "MaxResults": 100 });
            if let Some(token) = &next_token {
                body["NextToken"] = Value::String(token.clone());
            }

            let response = self.inner.call("ListSecrets", &body).await?;
            if let Some(page) = response["SecretList"].as_array() {
                names.extend(
                    page.iter()
                        .filter_map(|secret| secret["Name"].as_str())
                        .map(str::to_string),
                );
            }

            match response["NextToken"].as_str() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SecretsClient {
        SecretsClient::new(
            &server.uri(),
            "us-west-2",
            Credentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_falls_back_to_update_when_the_secret_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.CreateSecret"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "ResourceExistsException",
                "message": "already exists"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.UpdateSecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .create_secret("/rpcv/dev/orgs/1/secret", "{}")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_secrets_come_back_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.GetSecretValue"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "ResourceNotFoundException",
                "message": "not found"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.get_secret_value("absent").await.unwrap().is_none());
    }
}
