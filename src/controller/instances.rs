//! Instance reconciliation
//!
//! One pass reads the tracking ConfigMap, scans cluster membership, and drives
//! every host toward the record:
//!
//! ```text
//! ensure ConfigMap -> parse hosts -> list members -> load signer
//!     -> plan -> configure / skip -> deconfigure -> telemetry
//! ```
//!
//! Configure failures stop the pass at the first failing host. Deconfigure
//! failures do not: every stale member is attempted and the first failure is
//! reported once all of them ran.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, ObjectReference};
use kube::api::ListParams;
use kube::runtime::events::EventType;
use kube::{Api, Client};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::address::{Resolver, SystemResolver};
use crate::config::OperatorConfig;
use crate::credentials::{KubeSecretStore, SecretStore, Signer};
use crate::error::Error;
use crate::events::{actions, config_map_reference, reasons, EventPublisher, KubeEventPublisher};
use crate::instance::{parse_hosts, InstanceDescriptor};
use crate::member::{ClusterMember, MembershipScan};
use crate::metrics::{self, Outcome};
use crate::plan::{plan, Plan, ReconcileAction};
use crate::provision::{configure_annotations, HookProvisioner, Provisioner};
use crate::retry::Backoff;
use crate::telemetry::{EndpointsTelemetry, TelemetryConfigurator};
use crate::tracking::{ensure_tracking_resource, KubeTrackingStore, TrackingStore};
use crate::CONTROLLER_NAME;

/// Trait abstracting the cluster member listing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MemberLister: Send + Sync {
    /// List every cluster member, managed or not
    async fn list_members(&self) -> Result<Vec<ClusterMember>, Error>;
}

/// Member lister backed by the Node API
///
/// Nodes are listed without a selector; the annotation filter is applied
/// client-side because annotations cannot be selected on server-side.
pub struct KubeMemberLister {
    client: Client,
}

impl KubeMemberLister {
    /// Create a new KubeMemberLister wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MemberLister for KubeMemberLister {
    async fn list_members(&self) -> Result<Vec<ClusterMember>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items.iter().map(ClusterMember::from).collect())
    }
}

/// Controller context shared by every pass
pub struct Context {
    /// Tracking ConfigMap reads and creates
    pub tracking: Arc<dyn TrackingStore>,
    /// Cluster member listing
    pub members: Arc<dyn MemberLister>,
    /// Signing key source
    pub secrets: Arc<dyn SecretStore>,
    /// Hostname resolution for address validation
    pub resolver: Arc<dyn Resolver>,
    /// Host configure/deconfigure
    pub provisioner: Arc<dyn Provisioner>,
    /// Exporter endpoint management
    pub telemetry: Arc<dyn TelemetryConfigurator>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Names and tunables
    pub config: OperatorConfig,
    /// Fires on shutdown; aborts the pass in flight
    pub(super) shutdown: CancellationToken,
    /// Requeue delay state for failed passes
    pub(super) backoff: Mutex<Backoff>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context with mocked collaborators and default configuration
    #[cfg(test)]
    pub fn for_testing(
        tracking: Arc<dyn TrackingStore>,
        members: Arc<dyn MemberLister>,
        secrets: Arc<dyn SecretStore>,
        resolver: Arc<dyn Resolver>,
        provisioner: Arc<dyn Provisioner>,
        telemetry: Arc<dyn TelemetryConfigurator>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let config = OperatorConfig::default();
        Self {
            tracking,
            members,
            secrets,
            resolver,
            provisioner,
            telemetry,
            events,
            shutdown: CancellationToken::new(),
            backoff: Mutex::new(Backoff::new(config.requeue.clone())),
            config,
        }
    }
}

/// Builder for [`Context`]
///
/// Collaborators not set explicitly default to their Kubernetes-backed
/// implementations.
pub struct ContextBuilder {
    client: Client,
    config: OperatorConfig,
    provisioner: Option<Arc<dyn Provisioner>>,
    events: Option<Arc<dyn EventPublisher>>,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            config: OperatorConfig::default(),
            provisioner: None,
            events: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use the given operator configuration
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the provisioner (defaults to hooks from the configuration)
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Override the event publisher (defaults to the Kubernetes recorder)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Abort in-flight passes when `token` is cancelled
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let provisioner = self.provisioner.unwrap_or_else(|| {
            Arc::new(HookProvisioner::new(
                self.config.configure_hook.clone(),
                self.config.deconfigure_hook.clone(),
            ))
        });
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME)));

        Context {
            tracking: Arc::new(KubeTrackingStore::new(self.client.clone())),
            members: Arc::new(KubeMemberLister::new(self.client.clone())),
            secrets: Arc::new(KubeSecretStore::new(self.client.clone())),
            resolver: Arc::new(SystemResolver),
            provisioner,
            telemetry: Arc::new(EndpointsTelemetry::new(
                self.client,
                self.config.exporter_endpoints.clone(),
                self.config.exporter_port,
            )),
            events,
            shutdown: self.shutdown,
            backoff: Mutex::new(Backoff::new(self.config.requeue.clone())),
            config: self.config,
        }
    }
}

/// What a successful pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Hosts handed to the provisioner for configuration
    pub configured: usize,
    /// Hosts already joined and left alone
    pub skipped: usize,
    /// Stale members removed
    pub deconfigured: usize,
}

impl PassSummary {
    /// Whether the pass changed anything
    pub fn is_noop(&self) -> bool {
        self.configured == 0 && self.deconfigured == 0
    }
}

/// Desired and actual state observed at the start of a pass
struct Observation {
    desired: Vec<InstanceDescriptor>,
    scan: MembershipScan,
}

async fn observe(ctx: &Context, config_map: &ConfigMap) -> Result<Observation, Error> {
    let data = config_map.data.clone().unwrap_or_default();
    let desired = parse_hosts(&data, ctx.resolver.as_ref()).await?;
    let scan = MembershipScan::new(ctx.members.list_members().await?);
    debug!(
        desired = desired.len(),
        members = scan.all.len(),
        managed = scan.managed.len(),
        "observed state"
    );
    Ok(Observation { desired, scan })
}

/// Run one reconciliation pass
///
/// Nothing is cached between passes: the ConfigMap, the member list, DNS
/// answers and the signing key are all read fresh.
#[instrument(skip(ctx), fields(configmap = %ctx.config.tracking))]
pub async fn reconcile(ctx: &Context) -> Result<PassSummary, Error> {
    let start = Instant::now();
    let result = reconcile_pass(ctx).await;

    metrics::record_pass(start.elapsed().as_secs_f64(), Outcome::from(&result));
    if let Err(e) = &result {
        metrics::record_pass_error(e);
    }
    result
}

async fn reconcile_pass(ctx: &Context) -> Result<PassSummary, Error> {
    let config_map = ensure_tracking_resource(ctx.tracking.as_ref(), &ctx.config.tracking).await?;
    let subject = config_map_reference(&ctx.config.tracking, config_map.metadata.uid.clone());

    let observed = match observe(ctx, &config_map).await {
        Ok(o) => o,
        Err(e) => {
            if matches!(e, Error::Validation { .. } | Error::Resolution { .. }) {
                ctx.events
                    .publish(
                        &subject,
                        EventType::Warning,
                        reasons::INVALID_INSTANCE_RECORD,
                        actions::PARSE,
                        Some(e.to_string()),
                    )
                    .await;
            }
            return Err(e);
        }
    };

    if observed.desired.is_empty() && observed.scan.is_unmanaged() {
        debug!("no hosts desired and no managed members, nothing to do");
        return Ok(PassSummary::default());
    }

    let signer = ctx.secrets.load_signer(&ctx.config.private_key).await?;
    let plan = plan(&observed.desired, &observed.scan);
    let summary = execute_plan(ctx, &signer, &plan, &subject).await?;

    ctx.telemetry.configure().await.map_err(|e| match e {
        Error::Telemetry { .. } => e,
        other => Error::telemetry(other.to_string()),
    })?;

    info!(
        configured = summary.configured,
        skipped = summary.skipped,
        deconfigured = summary.deconfigured,
        "reconciliation complete"
    );
    Ok(summary)
}

/// Compute the plan for the current state without executing it
///
/// Read-only: a missing ConfigMap is treated as an empty record rather than
/// created.
pub async fn compute_plan(ctx: &Context) -> Result<Plan, Error> {
    let config_map = match ctx.tracking.get(&ctx.config.tracking).await {
        Ok(cm) => cm,
        Err(e) if e.is_not_found() => ConfigMap::default(),
        Err(e) => return Err(e),
    };
    let observed = observe(ctx, &config_map).await?;
    Ok(plan(&observed.desired, &observed.scan))
}

/// Attribute a provisioner failure to the host being configured
fn configure_failure(address: &str, error: Error) -> Error {
    match error {
        Error::Configure { .. } | Error::Cancelled => error,
        other => Error::configure(address, other.to_string()),
    }
}

/// Execute a plan produced by [`plan`]
///
/// Actions run sequentially in plan order, which puts every Configure and
/// Skip before any Deconfigure.
pub async fn execute_plan(
    ctx: &Context,
    signer: &Signer,
    plan: &Plan,
    subject: &ObjectReference,
) -> Result<PassSummary, Error> {
    let mut summary = PassSummary::default();
    let mut removal_failures: Vec<Error> = Vec::new();

    for action in &plan.actions {
        match action {
            ReconcileAction::Configure(instance) => {
                let annotations = configure_annotations(instance);
                let result = ctx
                    .provisioner
                    .configure(signer, instance, &annotations)
                    .await;
                metrics::record_action(action.kind(), Outcome::from(&result));

                if let Err(e) = result {
                    warn!(address = %instance.address, error = %e, "instance configuration failed");
                    ctx.events
                        .publish(
                            subject,
                            EventType::Warning,
                            reasons::INSTANCE_SETUP_FAILURE,
                            actions::CONFIGURE,
                            Some(format!(
                                "unable to join instance with address {} to the cluster",
                                instance.address
                            )),
                        )
                        .await;
                    return Err(configure_failure(&instance.address, e));
                }
                info!(address = %instance.address, "instance configured");
                summary.configured += 1;
            }
            ReconcileAction::Skip { instance, member } => {
                debug!(address = %instance.address, node = %member.name, "instance already configured");
                metrics::record_action(action.kind(), Outcome::Success);
                summary.skipped += 1;
            }
            ReconcileAction::Deconfigure(member) => {
                let result = ctx.provisioner.deconfigure(member).await;
                metrics::record_action(action.kind(), Outcome::from(&result));

                match result {
                    Ok(()) => {
                        info!(node = %member.name, "instance deconfigured");
                        summary.deconfigured += 1;
                    }
                    Err(e) => {
                        warn!(node = %member.name, error = %e, "instance removal failed");
                        ctx.events
                            .publish(
                                subject,
                                EventType::Warning,
                                reasons::INSTANCE_REMOVAL_FAILURE,
                                actions::DECONFIGURE,
                                Some(format!(
                                    "unable to remove node {} from the cluster: {}",
                                    member.name, e
                                )),
                            )
                            .await;
                        removal_failures.push(match e {
                            Error::Deconfigure { .. } => e,
                            other => Error::deconfigure(&member.name, other.to_string()),
                        });
                    }
                }
            }
        }
    }

    let failures = removal_failures.len();
    match removal_failures.into_iter().next() {
        None => Ok(summary),
        Some(Error::Deconfigure {
            member, message, ..
        }) => Err(Error::Deconfigure {
            member,
            message,
            failures,
        }),
        Some(other) => Err(other),
    }
}
