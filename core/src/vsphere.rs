//! Host network copy
//!
//! Copies vSwitch and portgroup definitions from one host system to another
//! inside the same vCenter. Existence checks make the copy idempotent; there
//! is no rollback, a failed step leaves earlier additions in place.

use anyhow::Result;
use tracing::info;

use crate::clients::vcenter::VcenterClient;

pub struct VsphereApi {
    client: VcenterClient,
}

impl VsphereApi {
    pub fn new(client: VcenterClient) -> Self {
        VsphereApi { client }
    }

    pub async fn copy_networks(&self, from_device: &str, to_device: &str) -> Result<()> {
        info!(from_device, to_device, "beginning network copy");

        let result = self.copy_networks_inner(from_device, to_device).await;
        self.client.close_session().await.ok();
        result
    }

    async fn copy_networks_inner(&self, from_device: &str, to_device: &str) -> Result<()> {
        let source = self.client.get_host_networking(from_device).await?;
        let mut destination = self.client.get_host_networking(to_device).await?;

        for vswitch in &source.vswitches {
            info!(vswitch = %vswitch.name, "checking vswitch");

            if destination.has_vswitch(&vswitch.name) {
                info!(vswitch = %vswitch.name, "vswitch already exists on destination");
            } else {
                info!(vswitch = %vswitch.name, "adding vswitch to destination");
                self.client
                    .add_host_vswitch(to_device, &vswitch.name, &vswitch.spec)
                    .await?;
            }

            for portgroup in source.portgroups_by_vswitch(&vswitch.name) {
                info!(portgroup = %portgroup.name, "checking portgroup");

                if source.do_not_copy(&portgroup.name) {
                    info!(portgroup = %portgroup.name, "portgroup is in do-not-copy list");
                    continue;
                }

                if destination.has_portgroup(&portgroup.name) {
                    info!(portgroup = %portgroup.name, "portgroup already exists on destination");
                } else {
                    info!(portgroup = %portgroup.name, "adding portgroup to destination");
                    self.client
                        .add_host_portgroup(to_device, &portgroup.spec)
                        .await?;
                    destination.portgroups.push(portgroup.clone());
                }
            }
        }

        info!("network copy complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_networking(server: &MockServer, host: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/rest/vcenter/host/{host}/networking")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": body })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn copies_missing_switches_and_portgroups_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/com/vmware/cis/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": "s" })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/rest/com/vmware/cis/session"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        mount_networking(
            &server,
            "host-a",
            json!({
                "vswitches": [{ "name": "vSwitch0", "spec": { "mtu": 1500 } }],
                "portgroups": [
                    { "name": "VM Network", "vswitch": "vSwitch0", "spec": { "name": "VM Network" } },
                    { "name": "Management Network", "vswitch": "vSwitch0", "spec": { "name": "Management Network" } }
                ],
                "vnics": [{ "portgroup": "Management Network" }]
            }),
        )
        .await;
        mount_networking(
            &server,
            "host-b",
            json!({ "vswitches": [], "portgroups": [], "vnics": [] }),
        )
        .await;

        Mock::given(method("POST"))
            .and(path("/rest/vcenter/host/host-b/networking/vswitches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;
        // Only "VM Network" is copied; the management portgroup backs a vnic.
        Mock::given(method("POST"))
            .and(path("/rest/vcenter/host/host-b/networking/portgroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let client = crate::clients::vcenter::test_support::client_for(&server);
        let api = VsphereApi::new(client);
        api.copy_networks("host-a", "host-b").await.unwrap();
    }
}
