//! Encore - internal ticketing API.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::http::{self, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub text: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub subject: String,
    pub description: String,
    pub category_id: String,
    pub sub_category_id: String,
    pub group: String,
    pub comment: Option<Comment>,
    pub tags: Vec<String>,
}

pub struct EncoreClient {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    token: String,
}

impl EncoreClient {
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Ok(EncoreClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Create a ticket on the tenant account, returning its id.
    pub async fn create_ticket(&self, tenant: &str, ticket: &Ticket) -> Result<String> {
        let request = self
            .http_client
            .post(format!("{}/v1/accounts/{tenant}/tickets", self.endpoint))
            .header("x-auth-token", &self.token)
            .json(ticket);

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("ticket creation failed")?;

        let body: serde_json::Value = response.json().await.context("invalid encore response")?;
        body["ticket"]["ticket_id"]
            .as_str()
            .map(str::to_string)
            .context("encore response missing ticket id")
    }

    pub async fn update_ticket(&self, tenant: &str, ticket_id: &str, comment: &Comment) -> Result<()> {
        let request = self
            .http_client
            .put(format!(
                "{}/v1/accounts/{tenant}/tickets/{ticket_id}",
                self.endpoint
            ))
            .header("x-auth-token", &self.token)
            .json(&json!({ "comment": comment }));

        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("ticket update failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_returns_ticket_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts/123456/tickets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "ticket": { "ticket_id": "TKT-42" }
            })))
            .mount(&server)
            .await;

        let encore = EncoreClient::new(&server.uri(), "tok").unwrap();
        let ticket = Ticket {
            subject: "vCenter unhealthy".to_string(),
            description: "UI health check is red".to_string(),
            category_id: "cat".to_string(),
            sub_category_id: "sub".to_string(),
            group: "Private Cloud-VMware-VMC".to_string(),
            comment: None,
            tags: vec![],
        };
        assert_eq!(encore.create_ticket("123456", &ticket).await.unwrap(), "TKT-42");
    }
}
