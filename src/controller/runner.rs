//! Controller wiring
//!
//! The tracking ConfigMap is the controller's only object. Managed Node
//! changes are mapped onto it, so the kube-runtime scheduler keeps exactly one
//! pass in flight and folds bursts of triggers into a single follow-up pass.
//! Failed passes are requeued by [`error_policy`] with an exponential backoff
//! that a success resets.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use super::instances::{reconcile, Context, PassSummary};
use crate::error::Error;
use crate::tracking::ensure_tracking_resource;
use crate::watch::{map_to_tracking, tracking_event_triggers, MemberSelector};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Log the outcome of one pass
fn log_pass_result(result: &Result<PassSummary, Error>) {
    match result {
        Ok(summary) => debug!(?summary, "reconciliation pass completed"),
        Err(Error::Cancelled) => info!("reconciliation pass cancelled"),
        Err(e) => error!(
            error = %e,
            subject = e.target().unwrap_or("-"),
            retryable = e.is_retryable(),
            "reconciliation pass failed"
        ),
    }
}

/// Reconcile the tracking ConfigMap
///
/// Runs one full pass. Shutdown aborts a pass that is still running.
pub async fn reconcile_tracking(
    config_map: Arc<ConfigMap>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if !tracking_event_triggers(&config_map, &ctx.config.tracking) {
        debug!(configmap = %config_map.name_any(), "ignoring unrelated ConfigMap");
        return Ok(Action::await_change());
    }

    let result = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => Err(Error::Cancelled),
        r = reconcile(&ctx) => r,
    };
    log_pass_result(&result);

    result.map(|_| {
        ctx.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        Action::await_change()
    })
}

/// Delay before re-running a pass that failed with `error`
///
/// Transient failures follow the growing backoff. Failures unlikely to clear
/// on their own (forbidden, missing objects) wait the longest delay, but are
/// still retried.
fn requeue_after(ctx: &Context, error: &Error) -> Duration {
    let mut backoff = ctx.backoff.lock().unwrap_or_else(PoisonError::into_inner);
    if error.is_retryable() {
        backoff.next_delay()
    } else {
        ctx.config.requeue.max_delay
    }
}

/// Requeue policy for failed passes
pub fn error_policy(config_map: Arc<ConfigMap>, error: &Error, ctx: Arc<Context>) -> Action {
    if matches!(error, Error::Cancelled) {
        return Action::await_change();
    }

    let delay = requeue_after(&ctx, error);
    warn!(
        configmap = %config_map.name_any(),
        error = %error,
        delay_ms = delay.as_millis(),
        "requeueing failed pass"
    );
    Action::requeue(delay)
}

type ControllerResult =
    Result<(ObjectRef<ConfigMap>, Action), controller::Error<Error, watcher::Error>>;

/// Handle one item of the controller's result stream
///
/// A trigger for a tracking ConfigMap that no longer exists recreates it; the
/// create is observed and runs the pass.
async fn handle_result(result: ControllerResult, ctx: &Context) {
    match result {
        Ok((obj, action)) => debug!(configmap = %obj, ?action, "reconciled"),
        Err(controller::Error::ObjectNotFound(obj)) => {
            info!(configmap = %obj, "tracking ConfigMap is missing, recreating");
            let identity = &ctx.config.tracking;
            if let Err(e) = ensure_tracking_resource(ctx.tracking.as_ref(), identity).await {
                warn!(error = %e, configmap = %identity, "failed to recreate tracking ConfigMap");
            }
        }
        // Already logged by the pass and the error policy
        Err(controller::Error::ReconcilerFailed(_, _)) => {}
        Err(e) => warn!(error = %e, "controller error"),
    }
}

/// Run the controller until the context's shutdown token fires
pub async fn run(ctx: Arc<Context>, client: Client) {
    let identity = ctx.config.tracking.clone();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &identity.namespace);
    let nodes: Api<Node> = Api::all(client);

    info!(configmap = %identity, "starting BYOH controller");

    let selector = MemberSelector::managed();
    let target = identity.clone();
    let shutdown = ctx.shutdown.clone();
    let results_ctx = ctx.clone();

    Controller::new(
        config_maps,
        WatcherConfig::default()
            .fields(&format!("metadata.name={}", identity.name))
            .timeout(WATCH_TIMEOUT_SECS),
    )
    .watches(
        nodes,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        move |node| map_to_tracking(&node, &selector, &target),
    )
    .graceful_shutdown_on(async move { shutdown.cancelled().await })
    .run(reconcile_tracking, error_policy, ctx)
    .for_each(|result| {
        let ctx = results_ctx.clone();
        async move { handle_result(result, &ctx).await }
    })
    .await;

    info!("BYOH controller stopped");
}
