//! Kubernetes Event recording
//!
//! Per-host failures are attached to the tracking ConfigMap as Warning
//! Events so they show up in `kubectl describe configmap byoh-instances`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::tracking::ObjectIdentity;

/// Trait for publishing Kubernetes Events.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "InstanceSetupFailure")
    /// * `action` - What action was taken (e.g. "Configure")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for callers that do not record events (e.g. `plan`)
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Reference to the tracking ConfigMap, used as the Event subject
pub fn config_map_reference(identity: &ObjectIdentity, uid: Option<String>) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("ConfigMap".to_string()),
        name: Some(identity.name.clone()),
        namespace: Some(identity.namespace.clone()),
        uid,
        ..Default::default()
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// A host could not be joined to the cluster
    pub const INSTANCE_SETUP_FAILURE: &str = "InstanceSetupFailure";
    /// A stale member could not be removed from the cluster
    pub const INSTANCE_REMOVAL_FAILURE: &str = "InstanceRemovalFailure";
    /// The desired-state record could not be parsed
    pub const INVALID_INSTANCE_RECORD: &str = "InvalidInstanceRecord";
}

/// Well-known event action strings.
pub mod actions {
    /// Joining a host as a node
    pub const CONFIGURE: &str = "Configure";
    /// Removing a node
    pub const DECONFIGURE: &str = "Deconfigure";
    /// Parsing the desired-state record
    pub const PARSE: &str = "Parse";
}
