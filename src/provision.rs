//! Provisioning collaborator
//!
//! Joining a machine to the cluster (installing the agent, bringing up the
//! kubelet) and removing it again happen outside the reconciliation core. The
//! core only decides *which* hosts to configure or deconfigure and hands each
//! one to a [`Provisioner`].
//!
//! [`HookProvisioner`] delegates both operations to operator-supplied
//! executables. Host details are passed as environment variables and the
//! private key is written to the hook's stdin so it never touches disk or the
//! process table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::credentials::Signer;
use crate::error::Error;
use crate::instance::InstanceDescriptor;
use crate::member::ClusterMember;
use crate::{BYOH_ANNOTATION, USERNAME_ANNOTATION};

/// Upper bound on a single hook invocation
const HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// Environment variable carrying the host address
pub const ENV_HOST_ADDRESS: &str = "BYOH_HOST_ADDRESS";
/// Environment variable carrying the login username
pub const ENV_HOST_USERNAME: &str = "BYOH_HOST_USERNAME";
/// Environment variable carrying `key=value` annotations, comma separated
pub const ENV_NODE_ANNOTATIONS: &str = "BYOH_NODE_ANNOTATIONS";
/// Environment variable carrying the member name on deconfigure
pub const ENV_NODE_NAME: &str = "BYOH_NODE_NAME";
/// Environment variable carrying the member addresses, comma separated
pub const ENV_NODE_ADDRESSES: &str = "BYOH_NODE_ADDRESSES";

/// Trait abstracting host provisioning
///
/// Implementations must apply `annotations` to the member they create; the
/// membership marker is only ever acquired this way.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Join the host described by `instance` to the cluster
    ///
    /// # Arguments
    ///
    /// * `signer` - Credential used to authenticate to the host
    /// * `instance` - Address and username of the host
    /// * `annotations` - Annotations the resulting member must carry
    async fn configure(
        &self,
        signer: &Signer,
        instance: &InstanceDescriptor,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Remove `member` from the cluster
    async fn deconfigure(&self, member: &ClusterMember) -> Result<(), Error>;
}

/// Annotations a configured member must carry
pub fn configure_annotations(instance: &InstanceDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BYOH_ANNOTATION.to_string(), "true".to_string()),
        (USERNAME_ANNOTATION.to_string(), instance.username.clone()),
    ])
}

/// Environment for the configure hook
fn configure_env(
    instance: &InstanceDescriptor,
    annotations: &BTreeMap<String, String>,
) -> Vec<(&'static str, String)> {
    let annotations = annotations
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    vec![
        (ENV_HOST_ADDRESS, instance.address.clone()),
        (ENV_HOST_USERNAME, instance.username.clone()),
        (ENV_NODE_ANNOTATIONS, annotations),
    ]
}

/// Environment for the deconfigure hook
fn deconfigure_env(member: &ClusterMember) -> Vec<(&'static str, String)> {
    let mut env = vec![
        (ENV_NODE_NAME, member.name.clone()),
        (ENV_NODE_ADDRESSES, member.addresses.join(",")),
    ];
    if let Some(username) = member.annotations.get(USERNAME_ANNOTATION) {
        env.push((ENV_HOST_USERNAME, username.clone()));
    }
    env
}

/// Provisioner that runs external hook executables
pub struct HookProvisioner {
    configure_hook: Option<PathBuf>,
    deconfigure_hook: Option<PathBuf>,
    timeout: Duration,
}

impl HookProvisioner {
    /// Create a provisioner running the given hooks
    pub fn new(configure_hook: Option<PathBuf>, deconfigure_hook: Option<PathBuf>) -> Self {
        Self {
            configure_hook,
            deconfigure_hook,
            timeout: HOOK_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `hook`, feeding `stdin` and returning stderr on failure
    async fn run(
        &self,
        hook: &Path,
        env: Vec<(&'static str, String)>,
        stdin: Option<&[u8]>,
    ) -> Result<(), String> {
        let mut child = Command::new(hook)
            .envs(env)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to execute {}: {}", hook.display(), e))?;

        // Feeding stdin and waiting share one deadline: a hook that neither
        // reads nor exits must not stall the pass.
        let exchange = async move {
            if let (Some(mut pipe), Some(bytes)) = (child.stdin.take(), stdin) {
                // A hook that exits without reading stdin is judged by its exit status
                if let Err(e) = pipe.write_all(bytes).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(format!("failed to write to {}: {}", hook.display(), e));
                    }
                }
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| format!("failed to wait for {}: {}", hook.display(), e))
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| format!("{} timed out after {:?}", hook.display(), self.timeout))??;

        debug!(
            hook = %hook.display(),
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "hook finished"
        );

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(hook = %hook.display(), status = %output.status, %stderr, "hook failed");
            if stderr.is_empty() {
                Err(format!("{} exited with {}", hook.display(), output.status))
            } else {
                Err(stderr)
            }
        }
    }
}

#[async_trait]
impl Provisioner for HookProvisioner {
    async fn configure(
        &self,
        signer: &Signer,
        instance: &InstanceDescriptor,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let hook = self
            .configure_hook
            .as_deref()
            .ok_or_else(|| Error::configure(&instance.address, "no configure hook is set"))?;

        info!(address = %instance.address, username = %instance.username, "running configure hook");
        self.run(
            hook,
            configure_env(instance, annotations),
            Some(signer.private_key_pem()),
        )
        .await
        .map_err(|e| Error::configure(&instance.address, e))
    }

    async fn deconfigure(&self, member: &ClusterMember) -> Result<(), Error> {
        let hook = self
            .deconfigure_hook
            .as_deref()
            .ok_or_else(|| Error::deconfigure(&member.name, "no deconfigure hook is set"))?;

        info!(member = %member.name, "running deconfigure hook");
        self.run(hook, deconfigure_env(member), None)
            .await
            .map_err(|e| Error::deconfigure(&member.name, e))
    }
}
