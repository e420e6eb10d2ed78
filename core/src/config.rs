//! Deployment configuration
//!
//! Endpoints and table names are selected per stage and can be overridden
//! individually through the environment, so local runs can point any single
//! collaborator at a stub without faking the whole world.

use std::env;

/// Janus credential lifetime in seconds.
pub const JANUS_TTL: i64 = 900;

/// Deployment stage, from `STAGE` (defaults to dev).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dev,
    Prod,
}

impl Stage {
    pub fn from_env() -> Self {
        match env::var("STAGE").as_deref() {
            Ok("prod") => Stage::Prod,
            _ => Stage::Dev,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Prod => "prod",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub stage: Stage,
    pub region: String,
    pub identity_endpoint: String,
    pub janus_endpoint: String,
    pub zamboni_endpoint: String,
    pub cms_endpoint: String,
    pub encore_endpoint: String,
    pub watchman_endpoint: String,
    pub azure_login_endpoint: String,
    pub azure_management_endpoint: String,
    pub mscloud_oauth_endpoint: String,
    pub mscloud_api_endpoint: String,
    pub goss_endpoint: String,
    pub dynamodb_endpoint: String,
    pub ssm_endpoint: String,
    pub secretsmanager_endpoint: String,
    pub customer_dns_domain: String,
}

impl Config {
    pub fn from_env() -> Self {
        let stage = Stage::from_env();
        let region = env::var("REGION").unwrap_or_else(|_| "us-west-2".to_string());

        let zamboni_default = match stage {
            Stage::Prod => "https://resources.rackspace.net",
            Stage::Dev => "https://staging.resources.rackspace.net",
        };
        let encore_default = match stage {
            Stage::Prod => "https://proxy.api.manage.rackspace.com/encore-api",
            Stage::Dev => "https://api.ticketing.encore.rackspace.com",
        };
        let goss_default = match stage {
            Stage::Prod => "https://api.goss.vdo.manage.rackspace.com/v1.0",
            Stage::Dev => "https://api.goss.dev.vdo.manage.rackspace.com/v1.0",
        };
        let customer_dns_default = match stage {
            Stage::Prod => "rpc-v.rackspace-cloud.com.",
            Stage::Dev => "dev.rpc-v.rackspace-cloud.com.",
        };

        Config {
            stage,
            identity_endpoint: override_or(
                "IDENTITY_ENDPOINT",
                "https://proxy.api.manage.rackspace.com/identity",
            ),
            janus_endpoint: override_or(
                "JANUS_ENDPOINT",
                "https://accounts.api.manage.rackspace.com",
            ),
            zamboni_endpoint: override_or("ZAMBONI_ENDPOINT", zamboni_default),
            cms_endpoint: override_or(
                "CMS_ENDPOINT",
                "https://proxy.api.manage.rackspace.com/customer-admin",
            ),
            encore_endpoint: override_or("ENCORE_ENDPOINT", encore_default),
            watchman_endpoint: override_or(
                "WATCHMAN_ENDPOINT",
                "https://watchman.api.manage.rackspace.com",
            ),
            azure_login_endpoint: override_or(
                "AZURE_LOGIN_ENDPOINT",
                "https://login.microsoftonline.com",
            ),
            azure_management_endpoint: override_or(
                "AZURE_MANAGEMENT_ENDPOINT",
                "https://management.azure.com",
            ),
            mscloud_oauth_endpoint: override_or(
                "MSCLOUD_OAUTH_ENDPOINT",
                "https://auth.mscloud.rackspace.com",
            ),
            mscloud_api_endpoint: override_or(
                "MSCLOUD_API_ENDPOINT",
                "https://api.mscloud.rackspace.com/api/v1",
            ),
            goss_endpoint: override_or("GOSS_ENDPOINT", goss_default),
            dynamodb_endpoint: override_or(
                "DYNAMODB_ENDPOINT",
                &format!("https://dynamodb.{region}.amazonaws.com"),
            ),
            ssm_endpoint: override_or("SSM_ENDPOINT", &format!("https://ssm.{region}.amazonaws.com")),
            secretsmanager_endpoint: override_or(
                "SECRETSMANAGER_ENDPOINT",
                &format!("https://secretsmanager.{region}.amazonaws.com"),
            ),
            customer_dns_domain: override_or("CUSTOMER_DNS_DOMAIN", customer_dns_default),
            region,
        }
    }

    /// Table holding `(resource_type, resource_id) -> token` records.
    ///
    /// Non-prod stages share the `dev` table unless `USE_USER_TOKENS_TABLE`
    /// names the developer's own table prefix.
    pub fn tokens_table(&self) -> String {
        let prefix = match self.stage {
            Stage::Prod => "prod".to_string(),
            Stage::Dev => env::var("USE_USER_TOKENS_TABLE")
                .ok()
                .filter(|user| !user.is_empty())
                .unwrap_or_else(|| "dev".to_string()),
        };
        format!("{prefix}-goss-api-tokens.v1")
    }

    pub fn metrics_table(&self) -> String {
        format!("{}-goss-api-metrics.v1", self.stage.as_str())
    }

    pub fn jobs_table(&self) -> String {
        format!("{}-vdo-ops-jobs.v0", self.stage.as_str())
    }
}

fn override_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_defaults_to_dev() {
        assert_eq!(Stage::Dev.as_str(), "dev");
        assert_eq!(Stage::Prod.as_str(), "prod");
    }

    #[test]
    fn user_tokens_table_is_opt_in() {
        let mut config = Config::from_env();
        config.stage = Stage::Dev;
        env::remove_var("USE_USER_TOKENS_TABLE");
        assert_eq!(config.tokens_table(), "dev-goss-api-tokens.v1");

        env::set_var("USE_USER_TOKENS_TABLE", "jdoe");
        assert_eq!(config.tokens_table(), "jdoe-goss-api-tokens.v1");
        env::remove_var("USE_USER_TOKENS_TABLE");
    }

    #[test]
    fn table_names_carry_stage() {
        let mut config = Config::from_env();
        config.stage = Stage::Prod;
        assert_eq!(config.tokens_table(), "prod-goss-api-tokens.v1");
        assert_eq!(config.metrics_table(), "prod-goss-api-metrics.v1");
        assert_eq!(config.jobs_table(), "prod-vdo-ops-jobs.v0");
    }
}
