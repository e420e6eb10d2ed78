//! Task handlers.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::clients::cms::{STATUS_ACTIVE, STATUS_CLOSED, TYPE_CLOUD, TYPE_RPCV};
use crate::clients::goss::{VcenterInfo, VmInfo};
use crate::clients::vcenter::VcenterClient;
use crate::secrets::ServiceAccountSecret;
use crate::tasks::{required, TaskContext};
use crate::vsphere::VsphereApi;

/// Copy host networking between two hypervisors of one vCenter.
pub async fn network_copy(context: &TaskContext, event: &Value) -> Result<Value> {
    let from_device = required(event, "from_device")?;
    let to_device = required(event, "to_device")?;
    let vcenter = required(event, "hostname")?;

    let from = context
        .zamboni
        .get_hyps_by_device_id(from_device)
        .await?
        .with_context(|| format!("no hypervisor with device id {from_device}"))?;
    let to = context
        .zamboni
        .get_hyps_by_device_id(to_device)
        .await?
        .with_context(|| format!("no hypervisor with device id {to_device}"))?;

    let from_host = host_name(&from)?;
    let to_host = host_name(&to)?;
    if from["location"] != to["location"] {
        bail!("hypervisors {from_host} and {to_host} live in different vCenters");
    }

    let (_, secret) = context
        .secrets
        .find_vcenter_secret(vcenter)
        .await?
        .with_context(|| format!("no stored credentials for vcenter {vcenter}"))?;

    let client = VcenterClient::new(
        vcenter.trim_end_matches('.'),
        &secret.admin_username,
        &secret.admin_password,
    )?;
    VsphereApi::new(client)
        .copy_networks(&from_host, &to_host)
        .await?;

    Ok(json!({ "from": from_host, "to": to_host, "status": "complete" }))
}

fn host_name(hypervisor: &Value) -> Result<String> {
    hypervisor["name"]
        .as_str()
        .map(str::to_string)
        .context("hypervisor record missing name")
}

/// Enroll a VM into GOSS monitoring/administration services.
pub async fn enroll_vm(context: &TaskContext, event: &Value) -> Result<Value> {
    let tenant = required(event, "tenant")?;
    let vm_uuid = required(event, "vm_uuid")?;
    let vcenter = required(event, "vcenter")?;
    let aws_account = required(event, "aws_account")?;
    let region = required(event, "region")?;
    let org = required(event, "org")?;
    let services: Vec<String> = event["services"]
        .as_array()
        .context("event is missing required field services")?
        .iter()
        .filter_map(|service| service.as_str().map(str::to_string))
        .collect();

    let (_, vcenter_secret) = context
        .secrets
        .find_vcenter_secret(vcenter)
        .await?
        .with_context(|| format!("no stored credentials for vcenter {vcenter}"))?;
    let account: ServiceAccountSecret = context
        .secrets
        .get(&context.secrets.service_account_key(org))
        .await?
        .with_context(|| format!("no service account secret for org {org}"))?;

    let location = context
        .goss
        .enroll_vm(
            tenant,
            &VmInfo {
                uuid: vm_uuid.to_string(),
                username: account.username,
                password: account.password,
            },
            &VcenterInfo {
                host: vcenter.trim_end_matches('.').to_string(),
                port: 443,
                username: vcenter_secret.admin_username,
                password: vcenter_secret.admin_password,
            },
            aws_account,
            region,
            &services,
        )
        .await?;

    Ok(json!({ "job_location": location }))
}

/// Create the RPC-V customer account for a cloud customer's domain.
/// Already-existing orgs make this a no-op.
pub async fn create_org(context: &TaskContext, event: &Value) -> Result<Value> {
    let domain = required(event, "domain")?;

    let existing = context
        .cms
        .get_customer_accounts(TYPE_RPCV, Some(domain))
        .await?;
    if let Some(account) = existing.iter().find(|account| account.status == STATUS_ACTIVE) {
        info!(domain, org = %account.id, "org already exists");
        return Ok(json!({ "org_id": account.id, "created": false }));
    }

    let cloud = context
        .cms
        .get_customer_accounts(TYPE_CLOUD, Some(domain))
        .await?
        .into_iter()
        .next()
        .with_context(|| format!("no cloud account for domain {domain}"))?;

    let business_unit = cloud
        .metadata
        .as_ref()
        .and_then(|metadata| metadata["Business_Unit"].as_str())
        .unwrap_or("RBU")
        .to_string();
    let org_id = event["org_id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = event["org_name"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("RPC-V {domain}"));

    context
        .cms
        .add_customer_account_to_customer(
            &cloud.rcn,
            &org_id,
            &name,
            domain,
            TYPE_RPCV,
            json!({ "Business_Unit": business_unit }),
        )
        .await?;

    info!(domain, org = %org_id, "created org");
    Ok(json!({ "org_id": org_id, "created": true }))
}

/// Close an RPC-V org. Closing an already-closed org is a no-op.
pub async fn close_org(context: &TaskContext, event: &Value) -> Result<Value> {
    let org_id = required(event, "org_id")?;

    let account = context
        .cms
        .get_customer_account(TYPE_RPCV, org_id)
        .await?
        .with_context(|| format!("no org with id {org_id}"))?;

    if account.status == STATUS_CLOSED {
        info!(org = %org_id, "org already closed");
        return Ok(json!({ "org_id": org_id, "status": STATUS_CLOSED }));
    }

    context
        .cms
        .update_customer_account(TYPE_RPCV, org_id, &account.name, STATUS_CLOSED, &account.rcn)
        .await?;

    info!(org = %org_id, "closed org");
    Ok(json!({ "org_id": org_id, "status": STATUS_CLOSED }))
}

/// Readiness probe: the vSphere API answers and the UI reports GREEN.
pub async fn check_vcenter(context: &TaskContext, event: &Value) -> Result<Value> {
    let vcenter = required(event, "hostname")?;

    let (_, secret) = context
        .secrets
        .find_vcenter_secret(vcenter)
        .await?
        .with_context(|| format!("no stored credentials for vcenter {vcenter}"))?;

    let client = VcenterClient::new(
        vcenter.trim_end_matches('.'),
        &secret.admin_username,
        &secret.admin_password,
    )?;

    let api_reachable = client.reach_vsphere_api().await?;
    let ui_healthy = api_reachable && client.is_ui_alive().await?;
    client.close_session().await.ok();

    Ok(json!({
        "api_reachable": api_reachable,
        "ui_healthy": ui_healthy,
        "ready": api_reachable && ui_healthy,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::context_for;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account(id: &str, account_type: &str, status: &str, metadata: Value) -> Value {
        json!({
            "id": id,
            "name": format!("org-{id}"),
            "type": account_type,
            "status": status,
            "rcn": "RCN-1",
            "createdBy": "tester",
            "createdDate": "2020-01-01T00:00:00Z",
            "domain": "123456",
            "serviceLevel": null,
            "metadata": metadata,
        })
    }

    #[tokio::test]
    async fn create_org_is_idempotent_for_existing_orgs() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/customer_accounts"))
            .and(query_param("accountType", TYPE_RPCV))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customerAccount": [account("org-1", TYPE_RPCV, STATUS_ACTIVE, Value::Null)],
                "link": [],
            })))
            .mount(&server)
            .await;

        let result = create_org(&context, &json!({ "domain": "123456" }))
            .await
            .unwrap();
        assert_eq!(result["created"], json!(false));
        assert_eq!(result["org_id"], json!("org-1"));
    }

    #[tokio::test]
    async fn create_org_propagates_the_cloud_business_unit() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/customer_accounts"))
            .and(query_param("accountType", TYPE_RPCV))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customerAccount": [],
                "link": [],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/customer_accounts"))
            .and(query_param("accountType", TYPE_CLOUD))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customerAccount": [account(
                    "cloud-1",
                    TYPE_CLOUD,
                    STATUS_ACTIVE,
                    json!({ "Business_Unit": "Enterprise" })
                )],
                "link": [],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/customers/RCN-1/customer_accounts"))
            .and(body_partial_json(
                json!({ "metadata": { "Business_Unit": "Enterprise" } }),
            ))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let result = create_org(&context, &json!({ "domain": "123456", "org_id": "org-new" }))
            .await
            .unwrap();
        assert_eq!(result["created"], json!(true));
        assert_eq!(result["org_id"], json!("org-new"));
    }

    #[tokio::test]
    async fn close_org_skips_already_closed_orgs() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/customer_accounts/RPC_V/org-1/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account(
                "org-1",
                TYPE_RPCV,
                STATUS_CLOSED,
                Value::Null,
            )))
            .mount(&server)
            .await;

        let result = close_org(&context, &json!({ "org_id": "org-1" }))
            .await
            .unwrap();
        assert_eq!(result["status"], json!(STATUS_CLOSED));
    }

    #[tokio::test]
    async fn close_org_updates_active_orgs() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/customer_accounts/RPC_V/org-1/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account(
                "org-1",
                TYPE_RPCV,
                STATUS_ACTIVE,
                Value::Null,
            )))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v3/customer_accounts/RPC_V/org-1"))
            .and(body_partial_json(json!({ "status": STATUS_CLOSED })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        close_org(&context, &json!({ "org_id": "org-1" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn network_copy_requires_known_hypervisors() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/managedvirt/vsphere/host_systems"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let event = json!({
            "from_device": "900001",
            "to_device": "900002",
            "hostname": "vc1.example",
        });
        let error = network_copy(&context, &event).await.unwrap_err();
        assert!(error.to_string().contains("900001"));
    }

    #[tokio::test]
    async fn enroll_vm_returns_the_goss_job_location() {
        let server = MockServer::start().await;
        let context = context_for(&server).await;

        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.ListSecrets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SecretList": [
                    { "Name": "/rpcv/dev/orgs/org-1/clusters/c-1/vcenters/vc1.example" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.GetSecretValue"))
            .and(body_partial_json(json!({
                "SecretId": "/rpcv/dev/orgs/org-1/clusters/c-1/vcenters/vc1.example"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SecretString": "{\"root_username\":\"root\",\"root_password\":\"rp\",\
                                 \"admin_username\":\"admin\",\"admin_password\":\"ap\"}"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", "secretsmanager.GetSecretValue"))
            .and(body_partial_json(
                json!({ "SecretId": "/rpcv/dev/orgs/org-1/service-account" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "SecretString": "{\"username\":\"svc\",\"password\":\"pw\"}"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/goss/enroll"))
            .and(body_partial_json(json!({ "vcenter": "vc1.example" })))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", "/jobs/j-9"))
            .mount(&server)
            .await;

        let event = json!({
            "tenant": "123456",
            "vm_uuid": "vm-1",
            "vcenter": "vc1.example.",
            "aws_account": "acct-1",
            "region": "us-west-2",
            "org": "org-1",
            "services": ["monitoring"],
        });
        let result = enroll_vm(&context, &event).await.unwrap();
        assert_eq!(result["job_location"], json!("/jobs/j-9"));
    }
}
