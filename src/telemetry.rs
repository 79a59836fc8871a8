//! Telemetry collaborator
//!
//! After a fully successful pass the node exporter scrape targets are
//! refreshed. [`EndpointsTelemetry`] keeps a selector-less Endpoints object
//! listing the InternalIP of every configured managed member, which a
//! headless Service of the same name exposes to the metrics scraper.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Node};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::member::ClusterMember;
use crate::tracking::ObjectIdentity;
use crate::CONTROLLER_NAME;

/// Name of the exporter port in the Endpoints object
const EXPORTER_PORT_NAME: &str = "metrics";

/// Trait abstracting metrics endpoint management
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TelemetryConfigurator: Send + Sync {
    /// Bring scrape targets in line with the current membership
    async fn configure(&self) -> Result<(), Error>;
}

/// InternalIP of a node, if it reports one
fn internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// Scrape targets for the given nodes, sorted and deduplicated
///
/// Only members that are managed and finished configuration are scraped.
pub fn exporter_targets(nodes: &[Node]) -> Vec<String> {
    let mut targets: Vec<String> = nodes
        .iter()
        .filter(|n| {
            let member = ClusterMember::from(*n);
            member.is_managed() && member.is_configured()
        })
        .filter_map(internal_ip)
        .collect();
    targets.sort();
    targets.dedup();
    targets
}

/// Endpoints manifest for server-side apply
pub fn endpoints_manifest(
    identity: &ObjectIdentity,
    port: u16,
    targets: &[String],
) -> serde_json::Value {
    let subsets = if targets.is_empty() {
        serde_json::json!([])
    } else {
        serde_json::json!([{
            "addresses": targets.iter().map(|ip| serde_json::json!({ "ip": ip })).collect::<Vec<_>>(),
            "ports": [{ "name": EXPORTER_PORT_NAME, "port": port, "protocol": "TCP" }]
        }])
    };
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Endpoints",
        "metadata": {
            "name": identity.name,
            "namespace": identity.namespace,
            "labels": { "app.kubernetes.io/managed-by": CONTROLLER_NAME }
        },
        "subsets": subsets
    })
}

/// Telemetry configurator maintaining an Endpoints object
pub struct EndpointsTelemetry {
    client: Client,
    identity: ObjectIdentity,
    port: u16,
}

impl EndpointsTelemetry {
    /// Create a configurator for the Endpoints object `identity`
    pub fn new(client: Client, identity: ObjectIdentity, port: u16) -> Self {
        Self {
            client,
            identity,
            port,
        }
    }
}

#[async_trait]
impl TelemetryConfigurator for EndpointsTelemetry {
    async fn configure(&self) -> Result<(), Error> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::telemetry(format!("listing nodes: {}", e)))?;

        let targets = exporter_targets(&nodes.items);
        let manifest = endpoints_manifest(&self.identity, self.port, &targets);

        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.identity.namespace);
        api.patch(
            &self.identity.name,
            &PatchParams::apply(CONTROLLER_NAME).force(),
            &Patch::Apply(&manifest),
        )
        .await
        .map_err(|e| Error::telemetry(format!("applying {}: {}", self.identity, e)))?;

        debug!(endpoints = %self.identity, targets = targets.len(), "exporter targets updated");
        Ok(())
    }
}
