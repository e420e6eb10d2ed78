//! DynamoDB over the `DynamoDB_20120810` JSON protocol.

use serde_json::{json, Value};

use crate::aws::{AwsError, AwsJsonClient, Credentials};

/// String attribute value.
pub fn s(value: &str) -> Value {
    json!({ "S": value })
}

/// Number attribute value; DynamoDB carries numbers as strings.
pub fn n(value: i64) -> Value {
    json!({ "N": value.to_string() })
}

pub struct DynamoClient {
    inner: AwsJsonClient,
}

impl DynamoClient {
    pub fn new(endpoint: &str, region: &str, credentials: Credentials) -> Result<Self, AwsError> {
        Ok(DynamoClient {
            inner: AwsJsonClient::new(
                endpoint,
                region,
                "dynamodb",
                "DynamoDB_20120810",
                "application/x-amz-json-1.0",
                credentials,
            )?,
        })
    }

    /// Write an item. A condition expression makes the write conditional;
    /// `ConditionalCheckFailedException` passes through for the caller to
    /// map.
    pub async fn put_item(
        &self,
        table: &str,
        item: Value,
        condition_expression: Option<&str>,
    ) -> Result<(), AwsError> {
        let mut body = json!({ "TableName": table, "Item": item });
        if let Some(expression) = condition_expression {
            body["ConditionExpression"] = Value::String(expression.to_string());
        }
        self.inner.call("PutItem", &body).await?;
        Ok(())
    }

    /// Read one item by full key; `None` when absent.
    pub async fn get_item(&self, table: &str, key: Value) -> Result<Option<Value>, AwsError> {
        let body = json!({ "TableName": table, "Key": key, "ConsistentRead": true });
        let response = self.inner.call("GetItem", &body).await?;
        match &response["Item"] {
            Value::Null => Ok(None),
            item => Ok(Some(item.clone())),
        }
    }

    /// Key-condition query, following `LastEvaluatedKey` until exhausted.
    pub async fn query(
        &self,
        table: &str,
        key_condition_expression: &str,
        expression_names: Option<Value>,
        expression_values: Value,
    ) -> Result<Vec<Value>, AwsError> {
        let mut items = Vec::new();
        let mut exclusive_start_key: Option<Value> = None;

        loop {
            let mut body = json!({
                "TableName": table,
                "KeyConditionExpression": key_condition_expression,
                "ExpressionAttributeValues": expression_values,
            });
            if let Some(names) = &expression_names {
                body["ExpressionAttributeNames"] = names.clone();
            }
            if let Some(key) = &exclusive_start_key {
                body["ExclusiveStartKey"] = key.clone();
            }

            let response = self.inner.call("Query", &body).await?;
            if let Some(page) = response["Items"].as_array() {
                items.extend(page.iter().cloned());
            }

            match &response["LastEvaluatedKey"] {
                Value::Null => break,
                key => exclusive_start_key = Some(key.clone()),
            }
        }

        Ok(items)
    }

    pub async fn update_item(
        &self,
        table: &str,
        key: Value,
        update_expression: &str,
        expression_names: Option<Value>,
        expression_values: Value,
        condition_expression: Option<&str>,
    ) -> Result<(), AwsError> {
        let mut body = json!({
            "TableName": table,
            "Key": key,
            "UpdateExpression": update_expression,
            "ExpressionAttributeValues": expression_values,
        });
        if let Some(names) = expression_names {
            body["ExpressionAttributeNames"] = names;
        }
        if let Some(expression) = condition_expression {
            body["ConditionExpression"] = Value::String(expression.to_string());
        }
        self.inner.call("UpdateItem", &body).await?;
        Ok(())
    }

    pub async fn delete_item(&self, table: &str, key: Value) -> Result<(), AwsError> {
        let body = json!({ "TableName": table, "Key": key });
        self.inner.call("DeleteItem", &body).await?;
        Ok(())
    }
}
