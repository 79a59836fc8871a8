//! Operator configuration
//!
//! Every setting is a CLI flag with an environment variable fallback, so the
//! operator can be configured from a Deployment's `env` without arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::retry::RetryConfig;
use crate::tracking::ObjectIdentity;
use crate::{DEFAULT_NAMESPACE, INSTANCES_CONFIG_MAP, PRIVATE_KEY_SECRET};

/// Default name of the exporter Endpoints object
pub const DEFAULT_EXPORTER_ENDPOINTS: &str = "byoh-node-exporter";

/// Default port the node exporter listens on
pub const DEFAULT_EXPORTER_PORT: u16 = 9182;

/// Settings shared by every subcommand
#[derive(Args, Clone, Debug)]
pub struct OperatorArgs {
    /// Namespace holding the tracking ConfigMap and the signing key
    #[arg(long, env = "WATCH_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Name of the tracking ConfigMap listing desired hosts
    #[arg(long, env = "BYOH_INSTANCES_CONFIGMAP", default_value = INSTANCES_CONFIG_MAP)]
    pub instances_config_map: String,

    /// Name of the Secret holding the private key used to reach hosts
    #[arg(long, env = "BYOH_PRIVATE_KEY_SECRET", default_value = PRIVATE_KEY_SECRET)]
    pub private_key_secret: String,

    /// Executable run to join a host to the cluster
    #[arg(long, env = "BYOH_CONFIGURE_HOOK")]
    pub configure_hook: Option<PathBuf>,

    /// Executable run to remove a member from the cluster
    #[arg(long, env = "BYOH_DECONFIGURE_HOOK")]
    pub deconfigure_hook: Option<PathBuf>,

    /// Name of the Endpoints object listing node exporter targets
    #[arg(long, env = "BYOH_EXPORTER_ENDPOINTS", default_value = DEFAULT_EXPORTER_ENDPOINTS)]
    pub exporter_endpoints: String,

    /// Port the node exporter listens on
    #[arg(long, env = "BYOH_EXPORTER_PORT", default_value_t = DEFAULT_EXPORTER_PORT)]
    pub exporter_port: u16,

    /// Initial delay before re-running a failed pass, in milliseconds
    #[arg(
        long,
        env = "BYOH_REQUEUE_INITIAL_MS",
        default_value_t = 5_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub requeue_initial_ms: u64,

    /// Maximum delay before re-running a failed pass, in seconds
    #[arg(long, env = "BYOH_REQUEUE_MAX_SECS", default_value_t = 300)]
    pub requeue_max_secs: u64,
}

/// Resolved operator configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Identity of the tracking ConfigMap
    pub tracking: ObjectIdentity,
    /// Identity of the signing key Secret
    pub private_key: ObjectIdentity,
    /// Executable run to join a host
    pub configure_hook: Option<PathBuf>,
    /// Executable run to remove a member
    pub deconfigure_hook: Option<PathBuf>,
    /// Identity of the exporter Endpoints object
    pub exporter_endpoints: ObjectIdentity,
    /// Port the node exporter listens on
    pub exporter_port: u16,
    /// Backoff applied to failed passes
    pub requeue: RetryConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            tracking: ObjectIdentity::new(DEFAULT_NAMESPACE, INSTANCES_CONFIG_MAP),
            private_key: ObjectIdentity::new(DEFAULT_NAMESPACE, PRIVATE_KEY_SECRET),
            configure_hook: None,
            deconfigure_hook: None,
            exporter_endpoints: ObjectIdentity::new(DEFAULT_NAMESPACE, DEFAULT_EXPORTER_ENDPOINTS),
            exporter_port: DEFAULT_EXPORTER_PORT,
            requeue: requeue_config(5_000, 300),
        }
    }
}

/// Lower bound on the first requeue delay; a zero delay never grows
const MIN_REQUEUE_DELAY: Duration = Duration::from_millis(1);

fn requeue_config(initial_ms: u64, max_secs: u64) -> RetryConfig {
    let initial_delay = Duration::from_millis(initial_ms).max(MIN_REQUEUE_DELAY);
    RetryConfig {
        max_attempts: 0,
        initial_delay,
        max_delay: Duration::from_secs(max_secs).max(initial_delay),
        backoff_multiplier: 2.0,
    }
}

impl From<OperatorArgs> for OperatorConfig {
    fn from(args: OperatorArgs) -> Self {
        Self {
            tracking: ObjectIdentity::new(&args.namespace, args.instances_config_map),
            private_key: ObjectIdentity::new(&args.namespace, args.private_key_secret),
            configure_hook: args.configure_hook,
            deconfigure_hook: args.deconfigure_hook,
            exporter_endpoints: ObjectIdentity::new(&args.namespace, args.exporter_endpoints),
            exporter_port: args.exporter_port,
            requeue: requeue_config(args.requeue_initial_ms, args.requeue_max_secs),
        }
    }
}
