//! vCloud Director REST/XML API.
//!
//! Sessions authenticate with basic auth (`user@org`) and carry the
//! `x-vcloud-authorization` header afterwards. Provisioning calls return a
//! task href; `check_task` reports completion and callers poll it.

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::http::{self, RetryPolicy};

const API_VERSION: &str = "33.0";

#[derive(Debug, Clone, Deserialize)]
pub struct OrgRef {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@href")]
    pub href: String,
}

#[derive(Debug, Deserialize)]
struct OrgList {
    #[serde(rename = "Org", default)]
    orgs: Vec<OrgRef>,
}

#[derive(Debug, Deserialize)]
struct TaskDocument {
    #[serde(rename = "@status")]
    status: String,
    #[serde(rename = "@operation", default)]
    operation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityWithTasks {
    #[serde(rename = "Tasks", default)]
    tasks: Option<TaskList>,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(rename = "Task", default)]
    tasks: Vec<TaskRef>,
}

#[derive(Debug, Deserialize)]
struct TaskRef {
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Deserialize)]
struct VdcList {
    #[serde(rename = "Vdc", default)]
    vdcs: Vec<OrgRef>,
}

pub struct VcloudClient {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    username: String,
    org: String,
    password: String,
    auth_token: Mutex<Option<String>>,
}

impl VcloudClient {
    pub fn new(endpoint: &str, username: &str, org: &str, password: &str) -> Result<Self> {
        Ok(VcloudClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.to_string(),
            org: org.to_string(),
            password: password.to_string(),
            auth_token: Mutex::new(None),
        })
    }

    async fn auth_header(&self) -> Result<String> {
        let mut token = self.auth_token.lock().await;
        if let Some(value) = token.as_ref() {
            return Ok(value.clone());
        }

        debug!(endpoint = %self.endpoint, "opening vcloud session");
        let request = self
            .http_client
            .post(format!("{}/api/sessions", self.endpoint))
            .basic_auth(format!("{}@{}", self.username, self.org), Some(&self.password))
            .header("Accept", format!("application/*+xml;version={API_VERSION}"));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("vcloud login failed")?;

        let value = response
            .headers()
            .get("x-vcloud-authorization")
            .and_then(|header| header.to_str().ok())
            .context("vcloud session response missing authorization header")?
            .to_string();

        *token = Some(value.clone());
        Ok(value)
    }

    async fn get_xml(&self, url: &str) -> Result<(StatusCode, String)> {
        let auth = self.auth_header().await?;
        let request = self
            .http_client
            .get(url)
            .header("x-vcloud-authorization", auth)
            .header("Accept", format!("application/*+xml;version={API_VERSION}"));

        let response = http::send_with_retry(request, &self.retry).await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    async fn post_xml(&self, url: &str, content_type: &str, body: String) -> Result<String> {
        let auth = self.auth_header().await?;
        let request = self
            .http_client
            .post(url)
            .header("x-vcloud-authorization", auth)
            .header("Accept", format!("application/*+xml;version={API_VERSION}"))
            .header("Content-Type", content_type)
            .body(body);

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .with_context(|| format!("vcloud POST {url} failed"))?;

        response.text().await.context("invalid vcloud response")
    }

    /// Org reference by name; `None` when the org does not exist.
    pub async fn get_org(&self, org_name: &str) -> Result<Option<OrgRef>> {
        let (status, body) = self.get_xml(&format!("{}/api/org", self.endpoint)).await?;
        if !status.is_success() {
            bail!("vcloud org listing failed with {status}");
        }

        let list: OrgList = quick_xml::de::from_str(&body).context("invalid org list")?;
        Ok(list.orgs.into_iter().find(|org| org.name == org_name))
    }

    pub async fn org_exists(&self, org_name: &str) -> Result<bool> {
        Ok(self.get_org(org_name).await?.is_some())
    }

    /// Create an enabled org. Returns its reference.
    pub async fn create_org(&self, org_name: &str, org_full_name: &str) -> Result<OrgRef> {
        info!(org_name, "creating vcloud org");
        let body = format!(
            r#"<AdminOrg xmlns="http://www.vmware.com/vcloud/v1.5" name="{org_name}">
  <FullName>{org_full_name}</FullName>
  <IsEnabled>true</IsEnabled>
  <Settings/>
</AdminOrg>"#
        );

        let response = self
            .post_xml(
                &format!("{}/api/admin/orgs", self.endpoint),
                "application/vnd.vmware.admin.organization+xml",
                body,
            )
            .await?;

        quick_xml::de::from_str(&response).context("invalid org creation response")
    }

    /// Delete an org (recursive, forced). Returns the deletion task href.
    pub async fn delete_org(&self, org_name: &str) -> Result<String> {
        let org = match self.get_org(org_name).await? {
            Some(org) => org,
            None => bail!("org {org_name} not found"),
        };

        info!(org_name, "deleting vcloud org");
        let auth = self.auth_header().await?;
        let request = self
            .http_client
            .delete(format!("{}?recursive=true&force=true", admin_href(&org.href)))
            .header("x-vcloud-authorization", auth)
            .header("Accept", format!("application/*+xml;version={API_VERSION}"));

        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("vcloud org deletion failed")?;

        let body = response.text().await.unwrap_or_default();
        let task: TaskRef = quick_xml::de::from_str(&body).context("invalid deletion task")?;
        Ok(task.href)
    }

    pub async fn vdc_exists(&self, org_name: &str, vdc_name: &str) -> Result<bool> {
        let org = match self.get_org(org_name).await? {
            Some(org) => org,
            None => return Ok(false),
        };

        let (status, body) = self.get_xml(&org.href).await?;
        if !status.is_success() {
            bail!("vcloud org lookup failed with {status}");
        }

        let list: VdcList = quick_xml::de::from_str(&body).context("invalid org document")?;
        Ok(list.vdcs.iter().any(|vdc| vdc.name == vdc_name))
    }

    /// Create an allocation-pool vdc in an org. Returns the provisioning
    /// task href; the vdc is usable once the task succeeds.
    pub async fn create_vdc(
        &self,
        org_name: &str,
        vdc_name: &str,
        provider_vdc_href: &str,
    ) -> Result<String> {
        let org = match self.get_org(org_name).await? {
            Some(org) => org,
            None => bail!("org {org_name} not found"),
        };

        info!(org_name, vdc_name, "creating vdc");
        let body = format!(
            r#"<CreateVdcParams xmlns="http://www.vmware.com/vcloud/v1.5" name="{vdc_name}">
  <AllocationModel>AllocationPool</AllocationModel>
  <ProviderVdcReference href="{provider_vdc_href}"/>
  <IsEnabled>true</IsEnabled>
</CreateVdcParams>"#
        );

        let response = self
            .post_xml(
                &format!("{}/vdcsparams", admin_href(&org.href)),
                "application/vnd.vmware.admin.createVdcParams+xml",
                body,
            )
            .await?;

        let vdc: EntityWithTasks =
            quick_xml::de::from_str(&response).context("invalid vdc creation response")?;
        vdc.tasks
            .and_then(|tasks| tasks.tasks.into_iter().next())
            .map(|task| task.href)
            .context("vdc creation response missing task")
    }

    /// Whether a task has finished successfully. Queued/running tasks return
    /// false; error, canceled and aborted tasks are failures.
    pub async fn check_task(&self, href: &str) -> Result<bool> {
        let (status, body) = self.get_xml(href).await?;
        if !status.is_success() {
            bail!("vcloud task lookup failed with {status}");
        }

        let task: TaskDocument = quick_xml::de::from_str(&body).context("invalid task")?;
        task_is_done(&task)
    }

    /// Power a vApp on or off. Returns the power task href.
    pub async fn power_vapp(&self, vapp_href: &str, on: bool) -> Result<String> {
        let action = if on { "powerOn" } else { "powerOff" };
        info!(vapp_href, action, "changing vapp power state");

        let response = self
            .post_xml(
                &format!("{vapp_href}/power/action/{action}"),
                "application/vnd.vmware.vcloud.task+xml",
                String::new(),
            )
            .await?;

        let task: TaskRef = quick_xml::de::from_str(&response).context("invalid power task")?;
        Ok(task.href)
    }

    /// Whether a vApp is powered on; vCloud encodes power state in the
    /// entity's `status` attribute (4 = powered on).
    pub async fn is_vapp_powered_on(&self, vapp_href: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct VappDocument {
            #[serde(rename = "@status")]
            status: String,
        }

        let (status, body) = self.get_xml(vapp_href).await?;
        if !status.is_success() {
            bail!("vcloud vapp lookup failed with {status}");
        }

        let vapp: VappDocument = quick_xml::de::from_str(&body).context("invalid vapp")?;
        Ok(vapp.status == "4")
    }
}

fn task_is_done(task: &TaskDocument) -> Result<bool> {
    match task.status.as_str() {
        "success" => Ok(true),
        "queued" | "preRunning" | "running" => Ok(false),
        other => bail!(
            "task {} ended in state {other}",
            task.operation.as_deref().unwrap_or("unknown")
        ),
    }
}

/// Org hrefs come back as `/api/org/{id}`; admin operations live under
/// `/api/admin/org/{id}`.
fn admin_href(org_href: &str) -> String {
    org_href.replace("/api/org/", "/api/admin/org/")
}
