//! Hand-rolled AWS access: SigV4 signing plus thin clients for the JSON
//! protocol services the backend stores its state in.

use std::env;

use anyhow::{Context, Result};

pub mod dynamo;
pub mod secretsmanager;
pub mod sigv4;
pub mod ssm;

mod json;
pub use json::{AwsError, AwsJsonClient};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Standard environment variables; the session token is optional.
    pub fn from_env() -> Result<Self> {
        Ok(Credentials {
            access_key_id: env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID is not set")?,
            secret_access_key: env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY is not set")?,
            session_token: env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}
