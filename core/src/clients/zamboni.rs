//! Zamboni - VM/hypervisor inventory API.
//!
//! Responses are enriched before they are returned: each VM gets its org id
//! copied into `_metadata` and a `service_value` bitmask computed from the
//! GOSS enrollment custom attributes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::clients::identity::IdentityAccount;
use crate::http::{self, RetryPolicy};

/// GOSS service attribute definitions and their bitmask values.
const SERVICES: [(&str, u64); 3] = [
    ("com.rackspace.goss.vm.services.os.admin", 1),
    ("com.rackspace.goss.vm.services.monitoring", 2),
    ("com.rackspace.goss.vm.services.patching", 4),
];

// The leading `id` works around a pagination bug in Zamboni.
const VM_FIELDS: [&str; 12] = [
    "id",
    "name",
    "location",
    "provider_account_id",
    "body.name",
    "body._rackspace",
    "body._metadata",
    "body.availableField",
    "body.value",
    "body.config.instanceUuid",
    "body.config.uuid",
    "body.guest",
];

const HOST_FIELDS: [&str; 5] = [
    "id",
    "location",
    "resource_id",
    "body.name",
    "body._rackspace",
];

pub struct Zamboni {
    http_client: Client,
    retry: RetryPolicy,
    endpoint: String,
    identity: Arc<IdentityAccount>,
}

impl Zamboni {
    pub fn new(endpoint: &str, identity: Arc<IdentityAccount>) -> Result<Self> {
        Ok(Zamboni {
            http_client: http::client()?,
            retry: RetryPolicy::default(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            identity,
        })
    }

    /// All VMs in a vCenter, enriched; `None` when the vCenter is unknown.
    pub async fn get_vms_by_vcenter(&self, vcenter: &str) -> Result<Option<Vec<Value>>> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .get(format!("{}/rpcv/vsphere/virtual_machines", self.endpoint))
            .header("x-auth-token", token)
            .query(&[
                ("filters[location]", vcenter),
                ("fields", &VM_FIELDS.join(",")),
            ]);

        let response = http::send_with_retry(request, &self.retry).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response
            .error_for_status()
            .context("zamboni VM listing failed")?
            .json()
            .await
            .context("invalid zamboni response")?;

        let mut vms: Vec<Value> =
            serde_json::from_value(body.get("data").cloned().unwrap_or(Value::Array(vec![])))
                .context("invalid zamboni VM list")?;

        for vm in &mut vms {
            apply_service_value(vm);
            apply_org_to_metadata(vm);
        }

        Ok(Some(vms))
    }

    /// The managed-virt hypervisor carrying a device id; errors when the
    /// inventory holds more than one.
    pub async fn get_hyps_by_device_id(&self, device_id: &str) -> Result<Option<Value>> {
        let token = self.identity.token().await?;
        let request = self
            .http_client
            .get(format!("{}/managedvirt/vsphere/host_systems", self.endpoint))
            .header("x-auth-token", token)
            .query(&[
                ("filters[body._rackspace.deviceId]", device_id),
                ("fields", &HOST_FIELDS.join(",")),
            ]);

        let response = http::send_with_retry(request, &self.retry).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = response
            .error_for_status()
            .context("zamboni hypervisor lookup failed")?
            .json()
            .await
            .context("invalid zamboni response")?;

        let data = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        match data.len() {
            0 => Ok(None),
            1 => Ok(Some(data[0].clone())),
            n => bail!("more than one hypervisor with device id {device_id} found ({n})"),
        }
    }
}

fn apply_org_to_metadata(vm: &mut Value) {
    let org = vm.get("provider_account_id").cloned().unwrap_or(Value::Null);
    if let Some(metadata) = vm.get_mut("_metadata").and_then(Value::as_object_mut) {
        metadata.insert("orgId".to_string(), org);
    }
}

fn apply_service_value(vm: &mut Value) {
    let value: u64 = SERVICES
        .iter()
        .map(|(definition, bit)| {
            if custom_attribute(vm, definition).as_deref() == Some("enrolled") {
                *bit
            } else {
                0
            }
        })
        .sum();

    if let Some(map) = vm.as_object_mut() {
        map.insert("service_value".to_string(), Value::from(value));
    }
}

/// Resolve a custom attribute value: find the field definition by name, then
/// the value entry sharing its key.
fn custom_attribute(vm: &Value, definition: &str) -> Option<String> {
    let fields = vm.get("availableField")?.as_array()?;
    let key = fields
        .iter()
        .find(|field| field["name"] == definition)?
        .get("key")?;

    let values = vm.get("value")?.as_array()?;
    values
        .iter()
        .find(|entry| entry.get("key") == Some(key))?
        .get("value")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vm_with_services(enrolled: &[&str]) -> Value {
        let fields: Vec<Value> = SERVICES
            .iter()
            .enumerate()
            .map(|(index, (name, _))| json!({ "name": name, "key": index }))
            .collect();
        let values: Vec<Value> = SERVICES
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| enrolled.contains(name))
            .map(|(index, _)| json!({ "key": index, "value": "enrolled" }))
            .collect();

        json!({
            "provider_account_id": "org-9",
            "_metadata": {},
            "availableField": fields,
            "value": values,
        })
    }

    #[test]
    fn service_value_is_a_bitmask() {
        let mut vm = vm_with_services(&[
            "com.rackspace.goss.vm.services.os.admin",
            "com.rackspace.goss.vm.services.patching",
        ]);
        apply_service_value(&mut vm);
        assert_eq!(vm["service_value"], json!(5));

        let mut unenrolled = vm_with_services(&[]);
        apply_service_value(&mut unenrolled);
        assert_eq!(unenrolled["service_value"], json!(0));
    }

    #[test]
    fn vm_projection_requests_both_uuids() {
        assert!(VM_FIELDS.contains(&"body.config.uuid"));
        assert!(VM_FIELDS.contains(&"body.config.instanceUuid"));
    }

    #[test]
    fn org_id_lands_in_metadata() {
        let mut vm = vm_with_services(&[]);
        apply_org_to_metadata(&mut vm);
        assert_eq!(vm["_metadata"]["orgId"], json!("org-9"));
    }

    async fn client_for(server: &MockServer) -> Zamboni {
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": {
                    "token": {
                        "id": "tok",
                        "expires": (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339()
                    }
                }
            })))
            .mount(server)
            .await;
        let identity = Arc::new(IdentityAccount::new(&server.uri(), "svc", "pw", None).unwrap());
        Zamboni::new(&server.uri(), identity).unwrap()
    }

    #[tokio::test]
    async fn unknown_vcenter_is_none() {
        let server = MockServer::start().await;
        let zamboni = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/rpcv/vsphere/virtual_machines"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(zamboni
            .get_vms_by_vcenter("nope")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_device_ids_error() {
        let server = MockServer::start().await;
        let zamboni = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/managedvirt/vsphere/host_systems"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "h1" }, { "id": "h2" }]
            })))
            .mount(&server)
            .await;

        assert!(zamboni.get_hyps_by_device_id("900001").await.is_err());
    }
}
