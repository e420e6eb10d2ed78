//! vCenter automation REST API.
//!
//! A session id is obtained with basic auth and cached for the life of the
//! client; `close_session` releases it. Long-running operations return a
//! task key that callers poll with `is_task_done` at their own cadence.

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::http::{self, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualSwitch {
    pub name: String,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Portgroup {
    pub name: String,
    pub vswitch: Option<String>,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualNic {
    pub portgroup: String,
}

/// A host's network config: switches, portgroups, and the vmkernel/console
/// adapters whose portgroups must never be copied.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostNetworking {
    #[serde(default)]
    pub vswitches: Vec<VirtualSwitch>,
    #[serde(default)]
    pub portgroups: Vec<Portgroup>,
    #[serde(default)]
    pub vnics: Vec<VirtualNic>,
}

impl HostNetworking {
    pub fn has_vswitch(&self, name: &str) -> bool {
        self.vswitches.iter().any(|vswitch| vswitch.name == name)
    }

    pub fn has_portgroup(&self, name: &str) -> bool {
        self.portgroups.iter().any(|portgroup| portgroup.name == name)
    }

    pub fn portgroups_by_vswitch(&self, vswitch: &str) -> Vec<&Portgroup> {
        self.portgroups
            .iter()
            .filter(|portgroup| portgroup.vswitch.as_deref() == Some(vswitch))
            .collect()
    }

    /// Portgroups backing vmkernel/console adapters are host-specific and
    /// excluded from copies.
    pub fn do_not_copy(&self, portgroup: &str) -> bool {
        self.vnics.iter().any(|vnic| vnic.portgroup == portgroup)
    }
}

pub struct VcenterClient {
    http_client: Client,
    retry: RetryPolicy,
    host: String,
    base: String,
    username: String,
    password: String,
    session: Mutex<Option<String>>,
}

impl VcenterClient {
    pub fn new(host: &str, username: &str, password: &str) -> Result<Self> {
        Ok(VcenterClient {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            host: host.to_string(),
            base: format!("https://{host}"),
            username: username.to_string(),
            password: password.to_string(),
            session: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn session_id(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.as_ref() {
            return Ok(id.clone());
        }

        debug!(host = %self.host, "opening vcenter session");
        let request = self
            .http_client
            .post(self.url("/rest/com/vmware/cis/session"))
            .basic_auth(&self.username, Some(&self.password));

        let body: Value = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .context("vcenter login failed")?
            .json()
            .await
            .context("invalid vcenter session response")?;

        let id = body["value"]
            .as_str()
            .context("vcenter session response missing id")?
            .to_string();
        *session = Some(id.clone());
        Ok(id)
    }

    pub async fn close_session(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(id) = session.take() {
            debug!(host = %self.host, "closing vcenter session");
            let request = self
                .http_client
                .delete(self.url("/rest/com/vmware/cis/session"))
                .header("vmware-api-session-id", id);
            http::send_with_retry(request, &self.retry)
                .await?
                .error_for_status()
                .context("vcenter logout failed")?;
        }
        Ok(())
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let id = self.session_id().await?;
        let request = self
            .http_client
            .get(self.url(path))
            .header("vmware-api-session-id", id);
        http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .with_context(|| format!("vcenter GET {path} failed"))?
            .json()
            .await
            .context("invalid vcenter response")
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let id = self.session_id().await?;
        let request = self
            .http_client
            .post(self.url(path))
            .header("vmware-api-session-id", id)
            .json(body);
        let response = http::send_with_retry(request, &self.retry)
            .await?
            .error_for_status()
            .with_context(|| format!("vcenter POST {path} failed"))?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json().await.context("invalid vcenter response")
    }

    /// Full network config of a host system.
    pub async fn get_host_networking(&self, host_name: &str) -> Result<HostNetworking> {
        let body = self
            .get_json(&format!("/rest/vcenter/host/{host_name}/networking"))
            .await?;
        serde_json::from_value(body.get("value").cloned().unwrap_or_default())
            .context("invalid host networking document")
    }

    pub async fn add_host_vswitch(
        &self,
        host_name: &str,
        vswitch_name: &str,
        spec: &Value,
    ) -> Result<()> {
        self.post_json(
            &format!("/rest/vcenter/host/{host_name}/networking/vswitches"),
            &json!({ "name": vswitch_name, "spec": spec }),
        )
        .await?;
        Ok(())
    }

    pub async fn add_host_portgroup(&self, host_name: &str, spec: &Value) -> Result<()> {
        self.post_json(
            &format!("/rest/vcenter/host/{host_name}/networking/portgroups"),
            &json!({ "spec": spec }),
        )
        .await?;
        Ok(())
    }

    /// Add a directory group to the SSO administrators.
    pub async fn add_ad_group(&self, group: &str) -> Result<()> {
        self.post_json(
            "/rest/hvc/management/administrators?action=add",
            &json!({ "group_name": group }),
        )
        .await?;
        Ok(())
    }

    /// Whether the task finished. A failed task is an error carrying the
    /// task's own message; callers own the polling cadence.
    pub async fn is_task_done(&self, task_key: &str) -> Result<bool> {
        let body = self.get_json(&format!("/rest/cis/tasks/{task_key}")).await?;
        let task = body.get("value").cloned().unwrap_or(body);
        let status = task["status"].as_str().unwrap_or("UNKNOWN");

        match status {
            "SUCCEEDED" => Ok(true),
            "FAILED" => {
                let message = task["error"]["message"]
                    .as_str()
                    .unwrap_or("no error message");
                bail!("task {task_key} failed: {message}")
            }
            _ => {
                info!(task_key, status, "task still running");
                Ok(false)
            }
        }
    }

    /// Appliance time; used as the cheapest authenticated liveness probe.
    pub async fn get_current_time(&self) -> Result<String> {
        let body = self.get_json("/rest/appliance/system/time").await?;
        body["value"]["datetime"]
            .as_str()
            .or_else(|| body["value"].as_str())
            .map(str::to_string)
            .context("vcenter time response missing value")
    }

    /// The UI health endpoint answers in XML; healthy means HTTP 200 with a
    /// GREEN status element.
    pub async fn is_ui_alive(&self) -> Result<bool> {
        let request = self.http_client.get(self.url("/ui/healthstatus"));
        let response = http::send_with_retry(request, &self.retry).await?;

        let status_code = response.status();
        let content = response.text().await.unwrap_or_default();

        let status = match parse_health_status(&content) {
            Some(status) => status,
            None => {
                warn!(host = %self.host, "healthstatus did not return parseable XML");
                return Ok(false);
            }
        };

        let is_healthy = status_code == StatusCode::OK && status == "GREEN";
        debug!(host = %self.host, %status_code, %status, is_healthy, "vcenter ui health");
        Ok(is_healthy)
    }

    /// Whether the API answers at all. Connection refused, timeouts and a
    /// 404 (something answered, but it is not a vCenter yet) all mean "not
    /// ready"; anything unexpected propagates.
    pub async fn reach_vsphere_api(&self) -> Result<bool> {
        match self.get_current_time().await {
            Ok(_) => Ok(true),
            Err(error) => {
                let not_ready = error.chain().any(|cause| {
                    cause
                        .downcast_ref::<reqwest::Error>()
                        .map(|e| {
                            e.is_connect()
                                || e.is_timeout()
                                || e.status() == Some(StatusCode::NOT_FOUND)
                        })
                        .unwrap_or(false)
                });
                if not_ready {
                    warn!(host = %self.host, "vcenter is not online yet");
                    Ok(false)
                } else {
                    Err(error)
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthDocument {
    #[serde(rename = "status")]
    status: String,
}

fn parse_health_status(xml: &str) -> Option<String> {
    quick_xml::de::from_str::<HealthDocument>(xml)
        .ok()
        .map(|document| document.status)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use wiremock::MockServer;

    /// A client wired to a mock server over plain HTTP.
    pub(crate) fn client_for(server: &MockServer) -> VcenterClient {
        VcenterClient {
            http_client: http::client().unwrap(),
            retry: RetryPolicy::default(),
            host: server.address().to_string(),
            base: server.uri(),
            username: "admin".to_string(),
            password: "pw".to_string(),
            session: Mutex::new(None),
        }
    }
}
