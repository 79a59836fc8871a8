//! BYOH operator - admits externally provisioned machines into a cluster
//!
//! A single ConfigMap (the tracking resource) lists the hosts that should be
//! cluster members. Every reconciliation pass diffs that list against the
//! Nodes carrying the membership annotation and configures new hosts, skips
//! hosts that are already joined, and deconfigures members nobody asked for.
//!
//! # Modules
//!
//! - [`address`] - Host address validation (IPv4 or resolvable name)
//! - [`instance`] - Desired-state record parsing
//! - [`member`] - Cluster membership scanning
//! - [`credentials`] - Signing credential loaded from a Secret
//! - [`plan`] - The configure/skip/deconfigure diff
//! - [`controller`] - Reconciliation pass, execution, and the kube-runtime controller
//! - [`tracking`] - Idempotent bootstrap of the tracking ConfigMap
//! - [`watch`] - Which cluster events trigger a pass
//! - [`provision`] - Provisioning collaborator (hook commands)
//! - [`telemetry`] - Exporter endpoint collaborator
//! - [`events`] - Kubernetes Event publishing
//! - [`metrics`] - OpenTelemetry instruments
//! - [`retry`] - Exponential backoff with jitter
//! - [`config`] - Operator configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod events;
pub mod instance;
pub mod member;
pub mod metrics;
pub mod plan;
pub mod provision;
pub mod retry;
pub mod telemetry;
pub mod tracking;
pub mod watch;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================

/// Annotation marking a Node as a member managed by this operator
///
/// Only the exact value `"true"` counts as managed.
pub const BYOH_ANNOTATION: &str = "byoh.fleet.dev/managed";

/// Annotation carrying the username used to reach a managed host
pub const USERNAME_ANNOTATION: &str = "byoh.fleet.dev/username";

/// Annotation written once host configuration completed (presence only)
pub const VERSION_ANNOTATION: &str = "byoh.fleet.dev/version";

/// Default operator namespace
pub const DEFAULT_NAMESPACE: &str = "byoh-system";

/// Default name of the tracking ConfigMap
pub const INSTANCES_CONFIG_MAP: &str = "byoh-instances";

/// Default name of the Secret holding the signing key
pub const PRIVATE_KEY_SECRET: &str = "byoh-private-key";

/// Name reported as the controller on Kubernetes Events
pub const CONTROLLER_NAME: &str = "byoh-operator";
