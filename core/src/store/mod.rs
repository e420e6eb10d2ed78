//! DynamoDB-backed state: API tokens, monitoring metric defaults and job
//! status records.

use crate::aws::AwsError;

pub mod jobs;
pub mod metrics;
pub mod tokens;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<AwsError> for StoreError {
    fn from(error: AwsError) -> Self {
        StoreError::Backend(anyhow::Error::new(error))
    }
}
