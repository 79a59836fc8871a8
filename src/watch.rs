//! Event filtering for reconciliation triggers
//!
//! The controller's only object is the tracking ConfigMap. Changes to managed
//! Nodes are remapped onto it, so any member change re-runs the whole
//! reconciliation rather than an incremental update.
//!
//! The watcher reports deletes it observes. Objects that vanish while a watch
//! is down are simply missing from the next listing and produce no event, so
//! a delete whose final state is unknown never reaches the tracking filter.
//!
//! Everything here is pure and can be tested without a live watch.

use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::tracking::ObjectIdentity;
use crate::BYOH_ANNOTATION;

/// Whether a tracking ConfigMap should be reconciled
///
/// Only the configured identity triggers a pass.
pub fn tracking_event_triggers(config_map: &ConfigMap, identity: &ObjectIdentity) -> bool {
    identity.matches(
        config_map.metadata.namespace.as_deref(),
        config_map.metadata.name.as_deref(),
    )
}

/// Selects Nodes by the membership annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberSelector {
    /// Select members whose marker is `true` (or, when false, those without it)
    pub managed: bool,
}

impl MemberSelector {
    /// Selector for Nodes carrying the membership marker
    pub fn managed() -> Self {
        Self { managed: true }
    }

    /// Selector for Nodes not carrying the membership marker
    pub fn unmanaged() -> Self {
        Self { managed: false }
    }

    /// Whether the node is selected
    pub fn matches(&self, node: &Node) -> bool {
        let marked = node.annotations().get(BYOH_ANNOTATION).map(String::as_str) == Some("true");
        marked == self.managed
    }
}

/// Reference to the tracking ConfigMap
pub fn tracking_ref(identity: &ObjectIdentity) -> ObjectRef<ConfigMap> {
    ObjectRef::new(&identity.name).within(&identity.namespace)
}

/// Map a Node change to the tracking ConfigMap
///
/// Selected members map to the single tracking identity; every other Node is
/// ignored.
pub fn map_to_tracking(
    member: &Node,
    selector: &MemberSelector,
    identity: &ObjectIdentity,
) -> Option<ObjectRef<ConfigMap>> {
    selector.matches(member).then(|| tracking_ref(identity))
}
