//! Operational task dispatch.
//!
//! Tasks arrive as an action name plus a JSON event, mirroring the workflow
//! engine that drives them. Dispatch binds the event's job id into the
//! tracing span so every log line of a handler carries it.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::Instrument;

use crate::aws::secretsmanager::SecretsClient;
use crate::aws::ssm::SsmClient;
use crate::aws::Credentials;
use crate::clients::cms::Cms;
use crate::clients::goss::VdoGoss;
use crate::clients::identity::IdentityAccount;
use crate::clients::zamboni::Zamboni;
use crate::config::Config;
use crate::secrets::SecretManager;

mod handlers;

pub struct TaskContext {
    pub zamboni: Zamboni,
    pub cms: Cms,
    pub goss: VdoGoss,
    pub secrets: SecretManager,
}

impl TaskContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        let username = env::var("IDENTITY_USERNAME").context("IDENTITY_USERNAME is not set")?;
        let password = env::var("IDENTITY_PASSWORD").context("IDENTITY_PASSWORD is not set")?;
        let identity = Arc::new(IdentityAccount::new(
            &config.identity_endpoint,
            &username,
            &password,
            None,
        )?);
        let credentials = Credentials::from_env()?;

        Ok(TaskContext {
            zamboni: Zamboni::new(&config.zamboni_endpoint, identity.clone())?,
            cms: Cms::new(&config.cms_endpoint, identity.clone())?,
            goss: VdoGoss::new(&config.goss_endpoint, identity)?,
            secrets: SecretManager::new(
                SecretsClient::new(
                    &config.secretsmanager_endpoint,
                    &config.region,
                    credentials.clone(),
                )?,
                SsmClient::new(&config.ssm_endpoint, &config.region, credentials)?,
                config.stage,
            ),
        })
    }
}

/// Run one task. The handler's JSON result is handed back to the workflow.
pub async fn dispatch(context: &TaskContext, action: &str, event: &Value) -> Result<Value> {
    let job_id = event["job_id"].as_str().unwrap_or("-").to_string();
    let span = tracing::info_span!("task", action, job_id = %job_id);

    async {
        match action {
            "network_copy" => handlers::network_copy(context, event).await,
            "enroll_vm" => handlers::enroll_vm(context, event).await,
            "create_org" => handlers::create_org(context, event).await,
            "close_org" => handlers::close_org(context, event).await,
            "check_vcenter" => handlers::check_vcenter(context, event).await,
            other => bail!("unknown action {other}"),
        }
    }
    .instrument(span)
    .await
}

/// A required string field of the event; the error names the missing field.
fn required<'a>(event: &'a Value, field: &str) -> Result<&'a str> {
    event[field]
        .as_str()
        .with_context(|| format!("event is missing required field {field}"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::MockServer;

    #[tokio::test]
    async fn unknown_actions_are_errors() {
        let server = MockServer::start().await;
        let context = test_support::context_for(&server).await;

        let error = dispatch(&context, "defragment", &json!({}))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("defragment"));
    }

    #[tokio::test]
    async fn missing_event_fields_name_the_offender() {
        let server = MockServer::start().await;
        let context = test_support::context_for(&server).await;

        let error = dispatch(&context, "network_copy", &json!({ "to_device": "900002" }))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("from_device"));
    }
}
