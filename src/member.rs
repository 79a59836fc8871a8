//! Cluster membership scanning
//!
//! Nodes are listed without any server-side selector and partitioned
//! client-side by the membership annotation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde::Serialize;

use crate::instance::InstanceDescriptor;
use crate::{BYOH_ANNOTATION, VERSION_ANNOTATION};

/// A live cluster member as seen at scan time
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClusterMember {
    /// Node name
    pub name: String,
    /// Every address the node reports
    pub addresses: Vec<String>,
    /// Node annotations
    #[serde(skip)]
    pub annotations: BTreeMap<String, String>,
}

impl ClusterMember {
    /// Create a member with no annotations
    pub fn new(name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addresses,
            annotations: BTreeMap::new(),
        }
    }

    /// Add an annotation (builder style)
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Whether this member carries the membership marker set to `true`
    pub fn is_managed(&self) -> bool {
        self.annotations.get(BYOH_ANNOTATION).map(String::as_str) == Some("true")
    }

    /// Whether this member finished its one-shot configuration
    pub fn is_configured(&self) -> bool {
        self.annotations.contains_key(VERSION_ANNOTATION)
    }

    /// Whether any of this member's addresses is exactly `address`
    pub fn has_address(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    /// Whether any descriptor in `instances` targets this member
    pub fn has_associated_instance(&self, instances: &[InstanceDescriptor]) -> bool {
        instances.iter().any(|i| self.has_address(&i.address))
    }
}

impl From<&Node> for ClusterMember {
    fn from(node: &Node) -> Self {
        let addresses = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .map(|addrs| addrs.iter().map(|a| a.address.clone()).collect())
            .unwrap_or_default();

        Self {
            name: node.name_any(),
            addresses,
            annotations: node.annotations().clone(),
        }
    }
}

/// Result of partitioning the member list
#[derive(Clone, Debug, Default)]
pub struct MembershipScan {
    /// Every member, used for address matching
    pub all: Vec<ClusterMember>,
    /// Members carrying the membership marker (the actual set)
    pub managed: Vec<ClusterMember>,
}

impl MembershipScan {
    /// Partition `members` into all and managed
    pub fn new(members: Vec<ClusterMember>) -> Self {
        let managed = members.iter().filter(|m| m.is_managed()).cloned().collect();
        Self {
            all: members,
            managed,
        }
    }

    /// Find the first member exposing `address`
    pub fn find_member(&self, address: &str) -> Option<&ClusterMember> {
        self.all.iter().find(|m| m.has_address(address))
    }

    /// Whether there are no managed members
    pub fn is_unmanaged(&self) -> bool {
        self.managed.is_empty()
    }
}
