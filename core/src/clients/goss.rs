//! VDO GOSS - VM service enrollment.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use crate::clients::identity::IdentityAccount;
use crate::http::{self, RetryPolicy};

#[derive(Debug, Clone)]
pub struct VmInfo {
    pub uuid: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct VcenterInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

pub struct VdoGoss {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    identity: Arc<IdentityAccount>,
}

impl VdoGoss {
    pub fn new(endpoint: &str, identity: Arc<IdentityAccount>) -> Result<Self> {
        Ok(VdoGoss {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            identity,
        })
    }

    /// Enroll a VM into GOSS services. Returns the job-status location
    /// handle for the caller to poll.
    pub async fn enroll_vm(
        &self,
        tenant_id: &str,
        vm: &VmInfo,
        vcenter: &VcenterInfo,
        aws_account: &str,
        region: &str,
        services: &[String],
    ) -> Result<String> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .post(format!("{}/goss/enroll", self.endpoint))
            .header("x-auth-token", token)
            .header("X-Tenant-Id", tenant_id)
            .json(&json!({
                "service": "rpcv",
                "vm_username": vm.username,
                "vm_password": vm.password,
                "vm_uuid": vm.uuid,
                "vcenter_username": vcenter.username,
                "vcenter_password": vcenter.password,
                "vcenter": vcenter.host,
                "vcenter_port": vcenter.port,
                "aws_account": aws_account,
                "region": region,
                "services": services,
            }));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("GOSS enrollment failed")?;

        response
            .headers()
            .get("Location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .context("GOSS response missing job location")
    }
}
