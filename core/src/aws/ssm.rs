//! SSM Parameter Store over the `AmazonSSM` JSON protocol.

use serde_json::{json, Value};

use crate::aws::{AwsError, AwsJsonClient, Credentials};

pub struct SsmClient {
    inner: AwsJsonClient,
}

impl SsmClient {
    pub fn new(endpoint: &str, region: &str, credentials: Credentials) -> Result<Self, AwsError> {
        Ok(SsmClient {
            inner: AwsJsonClient::new(
                endpoint,
                region,
                "ssm",
                "AmazonSSM",
                "application/x-amz-json-1.1",
                credentials,
            )?,
        })
    }

    /// Decrypted parameter value; `None` when the parameter does not exist.
    pub async fn get_parameter(&self, name: &str) -> Result<Option<String>, AwsError> {
        let body = json!({ "Name": name, "WithDecryption": true });
        match self.inner.call("GetParameter", &body).await {
            Ok(response) => Ok(response["Parameter"]["Value"].as_str().map(str::to_string)),
            Err(error) if error.is("ParameterNotFound") => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// All parameters under a path prefix as (name, value) pairs, following
    /// `NextToken` until the listing is exhausted.
    pub async fn get_parameters_by_path(
        &self,
        path: &str,
    ) -> Result<Vec<(String, String)>, AwsError> {
        let mut parameters = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({
                "Path": path,
                "Recursive": true,
                "WithDecryption": true,
            });
            if let Some(token) = &next_token {
                body["NextToken"] = Value::String(token.clone());
            }

            let response = self.inner.call("GetParametersByPath", &body).await?;
            if let Some(page) = response["Parameters"].as_array() {
                for parameter in page {
                    if let (Some(name), Some(value)) =
                        (parameter["Name"].as_str(), parameter["Value"].as_str())
                    {
                        parameters.push((name.to_string(), value.to_string()));
                    }
                }
            }

            match response["NextToken"].as_str() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SsmClient {
        SsmClient::new(
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
    async fn missing_parameters_come_back_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AmazonSSM.GetParameter"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "com.amazonaws.ssm#ParameterNotFound",
                "message": ""
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.get_parameter("/rpcv/dev/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn path_listing_follows_next_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AmazonSSM.GetParametersByPath"))
            .and(body_partial_json(json!({ "NextToken": "t1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Parameters": [{ "Name": "/rpcv/dev/b", "Value": "2" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AmazonSSM.GetParametersByPath"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Parameters": [{ "Name": "/rpcv/dev/a", "Value": "1" }],
                "NextToken": "t1"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let parameters = client.get_parameters_by_path("/rpcv/dev").await.unwrap();
        assert_eq!(
            parameters,
            vec![
                ("/rpcv/dev/a".to_string(), "1".to_string()),
                ("/rpcv/dev/b".to_string(), "2".to_string()),
            ]
        );
    }
}
