//! Reconciliation diff engine
//!
//! Computes, from the desired set and the scanned membership, one action per
//! host. Configure/Skip actions come first in desired-set order, followed by
//! Deconfigure actions in member-list order. Every host in
//! `desired ∪ managed` appears in exactly one action.

use std::fmt;

use serde::Serialize;

use crate::instance::InstanceDescriptor;
use crate::member::{ClusterMember, MembershipScan};

/// One decision of the diff engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ReconcileAction {
    /// The host is not yet a configured member and must be configured
    Configure(InstanceDescriptor),
    /// The host already backs a configured member
    Skip {
        /// Desired-state entry for the host
        instance: InstanceDescriptor,
        /// Member the host is registered as
        member: ClusterMember,
    },
    /// The managed member is no longer desired and must be removed
    Deconfigure(ClusterMember),
}

impl ReconcileAction {
    /// Address or member name this action targets
    pub fn target(&self) -> &str {
        match self {
            ReconcileAction::Configure(instance) => &instance.address,
            ReconcileAction::Skip { instance, .. } => &instance.address,
            ReconcileAction::Deconfigure(member) => &member.name,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileAction::Configure(_) => "configure",
            ReconcileAction::Skip { .. } => "skip",
            ReconcileAction::Deconfigure(_) => "deconfigure",
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Configure(i) => write!(f, "configure {} as {}", i.address, i.username),
            ReconcileAction::Skip { instance, member } => {
                write!(f, "skip {} (node {})", instance.address, member.name)
            }
            ReconcileAction::Deconfigure(m) => write!(f, "deconfigure node {}", m.name),
        }
    }
}

/// The ordered action list for one pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Actions in execution order
    pub actions: Vec<ReconcileAction>,
}

impl Plan {
    /// Whether there is nothing to do (not even a skip)
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Configure and Skip actions, in desired-set order
    pub fn admissions(&self) -> impl Iterator<Item = &ReconcileAction> {
        self.actions
            .iter()
            .filter(|a| !matches!(a, ReconcileAction::Deconfigure(_)))
    }

    /// Deconfigure actions, in member-list order
    pub fn evictions(&self) -> impl Iterator<Item = &ClusterMember> {
        self.actions.iter().filter_map(|a| match a {
            ReconcileAction::Deconfigure(m) => Some(m),
            _ => None,
        })
    }

    /// Number of actions that would call the provisioning collaborator
    pub fn mutation_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| !matches!(a, ReconcileAction::Skip { .. }))
            .count()
    }
}

/// Diff the desired set against the scanned membership
///
/// A desired host matched by any member (managed or not) that carries the
/// configuration-completed marker is skipped; every other desired host is
/// configured. A managed member whose addresses match no desired host is
/// deconfigured.
pub fn plan(desired: &[InstanceDescriptor], scan: &MembershipScan) -> Plan {
    let mut actions = Vec::with_capacity(desired.len() + scan.managed.len());

    for instance in desired {
        match scan.find_member(&instance.address) {
            Some(member) if member.is_configured() => actions.push(ReconcileAction::Skip {
                instance: instance.clone(),
                member: member.clone(),
            }),
            // TODO: compare the version annotation against the operator
            // version and re-configure on mismatch once upgrades are supported
            _ => actions.push(ReconcileAction::Configure(instance.clone())),
        }
    }

    for member in &scan.managed {
        if !member.has_associated_instance(desired) {
            actions.push(ReconcileAction::Deconfigure(member.clone()));
        }
    }

    Plan { actions }
}
