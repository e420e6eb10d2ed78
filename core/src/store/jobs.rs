//! Job status records backing the API's job lookup route.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::aws::dynamo::{self, DynamoClient};
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub domain: String,
    pub job_id: String,
    pub status: String,
    pub created: DateTime<Utc>,
    pub payload: Value,
}

pub struct JobStore {
    dynamo: DynamoClient,
    table: String,
}

impl JobStore {
    pub fn new(dynamo: DynamoClient, table: &str) -> Self {
        JobStore {
            dynamo,
            table: table.to_string(),
        }
    }

    pub async fn get(&self, domain: &str, job_id: &str) -> Result<Option<Job>, StoreError> {
        let item = self
            .dynamo
            .get_item(
                &self.table,
                json!({
                    "domain": dynamo::s(domain),
                    "job_id": dynamo::s(job_id),
                }),
            )
            .await?;

        match item {
            Some(item) => Ok(Some(parse_job(&item)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&job.payload)
            .map_err(|error| StoreError::Validation(format!("unencodable payload: {error}")))?;
        let item = json!({
            "domain": dynamo::s(&job.domain),
            "job_id": dynamo::s(&job.job_id),
            "status": dynamo::s(&job.status),
            "created": dynamo::s(&job.created.to_rfc3339()),
            "payload": dynamo::s(&payload),
        });
        self.dynamo.put_item(&self.table, item, None).await?;
        Ok(())
    }
}

fn parse_job(item: &Value) -> Result<Job, StoreError> {
    let field = |name: &str| -> Result<String, StoreError> {
        item[name]["S"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("job record missing {name}")))
    };

    let created = DateTime::parse_from_rfc3339(&field("created")?)
        .map_err(|error| StoreError::Backend(anyhow::anyhow!("bad job timestamp: {error}")))?
        .with_timezone(&Utc);
    let payload = serde_json::from_str(&field("payload")?)
        .map_err(|error| StoreError::Backend(anyhow::anyhow!("bad job payload: {error}")))?;

    Ok(Job {
        domain: field("domain")?,
        job_id: field("job_id")?,
        status: field("status")?,
        created,
        payload,
    })
}
