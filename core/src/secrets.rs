//! Secret storage for customer environments.
//!
//! Per-environment credentials (vCenter, hosts, appliance service accounts)
//! live in Secrets Manager under `/rpcv/{stage}/orgs/{org}/...` keys derived
//! from the environment topology. Shared service configuration comes from SSM
//! parameters grouped by category path.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aws::secretsmanager::SecretsClient;
use crate::aws::ssm::SsmClient;
use crate::config::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcenterSecret {
    pub root_username: String,
    pub root_password: String,
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMeterSecret {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZamboniSecret {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountSecret {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSecret {
    pub username: String,
    pub password: String,
}

pub struct SecretManager {
    secrets: SecretsClient,
    ssm: SsmClient,
    stage: Stage,
}

impl SecretManager {
    pub fn new(secrets: SecretsClient, ssm: SsmClient, stage: Stage) -> Self {
        SecretManager {
            secrets,
            ssm,
            stage,
        }
    }

    fn cluster_prefix(&self, org: &str, cluster: &str) -> String {
        format!(
            "/rpcv/{}/orgs/{org}/clusters/{cluster}",
            self.stage.as_str()
        )
    }

    pub fn vcenter_key(&self, org: &str, cluster: &str, vcenter_dns: &str) -> String {
        format!(
            "{}/vcenters/{}",
            self.cluster_prefix(org, cluster),
            strip_trailing_dot(vcenter_dns)
        )
    }

    pub fn usage_meter_key(&self, org: &str, cluster: &str) -> String {
        format!("{}/usage-meter", self.cluster_prefix(org, cluster))
    }

    pub fn zamboni_key(&self, org: &str, cluster: &str) -> String {
        format!("{}/zamboni-readonly", self.cluster_prefix(org, cluster))
    }

    pub fn host_key(&self, org: &str, cluster: &str, host_dns: &str) -> String {
        format!(
            "{}/hosts/{}",
            self.cluster_prefix(org, cluster),
            strip_trailing_dot(host_dns)
        )
    }

    pub fn service_account_key(&self, org: &str) -> String {
        format!("/rpcv/{}/orgs/{org}/service-account", self.stage.as_str())
    }

    /// Store a typed secret, overwriting any previous value.
    pub async fn persist<T: Serialize>(&self, key: &str, secret: &T) -> Result<()> {
        let value = serde_json::to_string(secret).context("cannot encode secret")?;
        debug!(key, "persisting secret");
        self.secrets
            .create_secret(key, &value)
            .await
            .with_context(|| format!("cannot persist secret {key}"))?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let value = self
            .secrets
            .get_secret_value(key)
            .await
            .with_context(|| format!("cannot check secret {key}"))?;
        Ok(value.is_some())
    }

    /// Typed secret by key; `None` when absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = self
            .secrets
            .get_secret_value(key)
            .await
            .with_context(|| format!("cannot read secret {key}"))?;
        match value {
            Some(value) => Ok(Some(
                serde_json::from_str(&value).with_context(|| format!("malformed secret {key}"))?,
            )),
            None => Ok(None),
        }
    }

    /// Whether any stored vcenter secret refers to this DNS name, regardless
    /// of which org and cluster it lives under.
    pub async fn is_vcenter_in_secret_manager(&self, vcenter_dns: &str) -> Result<bool> {
        Ok(self.find_vcenter_key(vcenter_dns).await?.is_some())
    }

    /// Credentials for a vcenter looked up by DNS name alone, for callers
    /// that know the vcenter but not which org and cluster own it.
    pub async fn find_vcenter_secret(
        &self,
        vcenter_dns: &str,
    ) -> Result<Option<(String, VcenterSecret)>> {
        let key = match self.find_vcenter_key(vcenter_dns).await? {
            Some(key) => key,
            None => return Ok(None),
        };
        let secret = self.get(&key).await?;
        Ok(secret.map(|secret| (key, secret)))
    }

    async fn find_vcenter_key(&self, vcenter_dns: &str) -> Result<Option<String>> {
        let suffix = format!("/vcenters/{}", strip_trailing_dot(vcenter_dns));
        let prefix = format!("/rpcv/{}/orgs/", self.stage.as_str());
        let names = self
            .secrets
            .list_secrets()
            .await
            .context("cannot list secrets")?;
        Ok(names
            .into_iter()
            .find(|name| name.starts_with(&prefix) && name.ends_with(&suffix)))
    }

    /// Service configuration for one category as relative key -> value,
    /// loaded from SSM under `/rpcv/{stage}/{category}`.
    pub async fn config_secrets(&self, category: &str) -> Result<HashMap<String, String>> {
        let path = format!("/rpcv/{}/{category}", self.stage.as_str());
        let parameters = self
            .ssm
            .get_parameters_by_path(&path)
            .await
            .with_context(|| format!("cannot load config secrets under {path}"))?;
        Ok(parameters
            .into_iter()
            .map(|(name, value)| {
                let relative = name
                    .strip_prefix(&format!("{path}/"))
                    .unwrap_or(&name)
                    .to_string();
                (relative, value)
            })
            .collect())
    }
}

/// Customer DNS names are stored without the zone's trailing dot.
fn strip_trailing_dot(dns: &str) -> &str {
    dns.strip_suffix('.').unwrap_or(dns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::Credentials;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_for(server: &MockServer) -> SecretManager {
        let credentials = Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        };
        SecretManager::new(
            SecretsClient::new(&server.uri(), "us-west-2", credentials.clone()).unwrap(),
            SsmClient::new(&server.uri(), "us-west-2", credentials).unwrap(),
            Stage::Dev,
        )
    }

    #[tokio::test]
    async fn keys_strip_trailing_dns_dots() {
        let server = MockServer::start().await;
        let manager = manager_for(&server);
        assert_eq!(
            manager.vcenter_key("org-1", "c-1", "vc1.dev.rpc-v.rackspace-cloud.com."),
            "/rpcv/dev/orgs/org-1/clusters/c-1/vcenters/vc1.dev.rpc-v.rackspace-cloud.com"
        );
        assert_eq!(
            manager.host_key("org-1", "c-1", "h1.example"),
            "/rpcv/dev/orgs/org-1/clusters/c-1/hosts/h1.example"
        );
    }

    #[tokio::test]
    async fn typed_secrets_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.GetSecretValue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SecretString": "{\"root_username\":\"root\",\"root_password\":\"rp\",\
                                 \"admin_username\":\"admin\",\"admin_password\":\"ap\"}"
            })))
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        let secret: VcenterSecret = manager
            .get(&manager.vcenter_key("org-1", "c-1", "vc1.example"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(secret.admin_username, "admin");
    }

    #[tokio::test]
    async fn vcenter_lookup_scans_the_secret_listing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.ListSecrets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SecretList": [
                    { "Name": "/rpcv/dev/orgs/org-1/clusters/c-1/vcenters/vc1.example" },
                    { "Name": "/rpcv/dev/orgs/org-2/clusters/c-9/usage-meter" }
                ]
            })))
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        assert!(manager
            .is_vcenter_in_secret_manager("vc1.example.")
            .await
            .unwrap());
        assert!(!manager
            .is_vcenter_in_secret_manager("vc2.example")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn config_secrets_are_keyed_relative_to_their_category() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "AmazonSSM.GetParametersByPath"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Parameters": [
                    { "Name": "/rpcv/dev/encore/token", "Value": "tok" }
                ]
            })))
            .mount(&server)
            .await;

        let manager = manager_for(&server);
        let secrets = manager.config_secrets("encore").await.unwrap();
        assert_eq!(secrets["token"], "tok");
    }
}
