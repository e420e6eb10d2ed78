//! API tokens keyed by `resource_type:resource_id`.
//!
//! One token per resource: creation is a conditional put, updates require the
//! record to exist, deletion is unconditional. aws-account tokens expire
//! through a 60-day DynamoDB TTL that updates refresh.

use chrono::Utc;
use tracing::info;

use crate::aws::dynamo::{self, DynamoClient};
use crate::store::StoreError;

pub const VALID_TYPES: &[&str] = &["aws-account"];

const TOKEN_TTL_DAYS: i64 = 60;

pub struct TokenStore {
    dynamo: DynamoClient,
    table: String,
}

impl TokenStore {
    pub fn new(dynamo: DynamoClient, table: &str) -> Self {
        TokenStore {
            dynamo,
            table: table.to_string(),
        }
    }

    fn key(resource_type: &str, resource_id: &str) -> String {
        format!("{resource_type}:{resource_id}")
    }

    fn validate_type(resource_type: &str) -> Result<(), StoreError> {
        if VALID_TYPES.contains(&resource_type) {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "invalid resource type {resource_type}, expected one of {VALID_TYPES:?}"
            )))
        }
    }

    fn expiry() -> i64 {
        (Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp()
    }

    pub async fn create(
        &self,
        resource_type: &str,
        resource_id: &str,
        token: &str,
    ) -> Result<(), StoreError> {
        Self::validate_type(resource_type)?;
        let key = Self::key(resource_type, resource_id);

        let item = serde_json::json!({
            "resource": dynamo::s(&key),
            "token": dynamo::s(token),
            "ttl": dynamo::n(Self::expiry()),
        });
        let result = self
            .dynamo
            .put_item(&self.table, item, Some("attribute_not_exists(resource)"))
            .await;

        match result {
            Ok(()) => {
                info!(resource = %key, "stored token");
                Ok(())
            }
            Err(error) if error.is("ConditionalCheckFailedException") => {
                Err(StoreError::Conflict(format!("token for {key}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn read(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Self::validate_type(resource_type)?;
        let key = Self::key(resource_type, resource_id);

        let item = self
            .dynamo
            .get_item(&self.table, serde_json::json!({ "resource": dynamo::s(&key) }))
            .await?;
        Ok(item.and_then(|item| item["token"]["S"].as_str().map(str::to_string)))
    }

    pub async fn update(
        &self,
        resource_type: &str,
        resource_id: &str,
        token: &str,
    ) -> Result<(), StoreError> {
        Self::validate_type(resource_type)?;
        let key = Self::key(resource_type, resource_id);

        let result = self
            .dynamo
            .update_item(
                &self.table,
                serde_json::json!({ "resource": dynamo::s(&key) }),
                "SET #token = :token, #ttl = :ttl",
                Some(serde_json::json!({ "#token": "token", "#ttl": "ttl" })),
                serde_json::json!({
                    ":token": dynamo::s(token),
                    ":ttl": dynamo::n(Self::expiry()),
                }),
                Some("attribute_exists(resource)"),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(error) if error.is("ConditionalCheckFailedException") => {
                Err(StoreError::NotFound(format!("token for {key}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Idempotent; deleting an absent token succeeds.
    pub async fn delete(&self, resource_type: &str, resource_id: &str) -> Result<(), StoreError> {
        Self::validate_type(resource_type)?;
        let key = Self::key(resource_type, resource_id);

        self.dynamo
            .delete_item(&self.table, serde_json::json!({ "resource": dynamo::s(&key) }))
            .await?;
        Ok(())
    }
}
