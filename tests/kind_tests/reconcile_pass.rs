//! Stories about reconciliation passes against a live API server
//!
//! Host provisioning is recorded rather than performed, so these tests
//! exercise every Kubernetes interaction of a pass (ConfigMap, Nodes, Secret,
//! Endpoints) without needing reachable machines.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Endpoints;
use kube::api::Api;

use byoh_operator::controller::{compute_plan, reconcile, Context};
use byoh_operator::plan::ReconcileAction;
use byoh_operator::Error;

use super::helpers::{
    cleanup_namespace, config_for, ensure_test_cluster, quiet_events, test_namespace,
    write_private_key, write_record, RecordingProvisioner,
};

/// Story: a fresh install with an empty host list does nothing
///
/// The kind nodes carry no membership marker, so there is nothing desired and
/// nothing managed. The pass must succeed without the private key existing.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_empty_host_list_is_a_noop() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-empty").await;
    let provisioner = RecordingProvisioner::default();

    let ctx = Context::builder(client.clone())
        .config(config_for(&namespace))
        .provisioner(Arc::new(provisioner.clone()))
        .events(quiet_events())
        .build();

    let summary = reconcile(&ctx).await.expect("pass should succeed");
    assert!(summary.is_noop());
    assert!(provisioner.configured.lock().unwrap().is_empty());

    cleanup_namespace(&client, &namespace).await;
}

/// Story: an administrator adds a host to the list
///
/// Expected behavior:
/// - The plan preview shows one configure action
/// - The pass hands the host to the provisioner once
/// - Exporter Endpoints are written (empty until the host reports as configured)
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_new_host_is_handed_to_the_provisioner() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-configure").await;
    let config = config_for(&namespace);
    let provisioner = RecordingProvisioner::default();

    write_record(&client, &config.tracking, &[("10.255.0.1", "username=admin")]).await;
    write_private_key(&client, &config.private_key).await;

    let ctx = Context::builder(client.clone())
        .config(config.clone())
        .provisioner(Arc::new(provisioner.clone()))
        .events(quiet_events())
        .build();

    let plan = compute_plan(&ctx).await.expect("plan should succeed");
    assert!(matches!(
        plan.actions.as_slice(),
        [ReconcileAction::Configure(i)] if i.address == "10.255.0.1"
    ));

    let summary = reconcile(&ctx).await.expect("pass should succeed");
    assert_eq!(summary.configured, 1);
    assert_eq!(
        *provisioner.configured.lock().unwrap(),
        vec!["10.255.0.1".to_string()]
    );

    let endpoints: Api<Endpoints> = Api::namespaced(client.clone(), &namespace);
    endpoints
        .get(&config.exporter_endpoints.name)
        .await
        .expect("exporter endpoints written");

    cleanup_namespace(&client, &namespace).await;
}

/// Story: a host is listed but the private key was never installed
///
/// Expected behavior:
/// - The pass fails with a credential error naming the secret
/// - No host is touched
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_private_key_blocks_all_hosts() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-nokey").await;
    let config = config_for(&namespace);
    let provisioner = RecordingProvisioner::default();

    write_record(&client, &config.tracking, &[("10.255.0.1", "username=admin")]).await;

    let ctx = Context::builder(client.clone())
        .config(config)
        .provisioner(Arc::new(provisioner.clone()))
        .events(quiet_events())
        .build();

    let err = reconcile(&ctx).await.unwrap_err();
    assert!(matches!(err, Error::Credential { .. }));
    assert!(provisioner.configured.lock().unwrap().is_empty());

    cleanup_namespace(&client, &namespace).await;
}

/// Story: an administrator types an IPv6 address into the list
///
/// Expected behavior:
/// - The whole pass is rejected with an unsupported address family error
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_ipv6_entry_rejects_the_record() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-ipv6").await;
    let config = config_for(&namespace);

    write_record(
        &client,
        &config.tracking,
        &[("10.255.0.1", "username=admin"), ("fd00::1", "username=admin")],
    )
    .await;

    let ctx = Context::builder(client.clone())
        .config(config)
        .provisioner(Arc::new(RecordingProvisioner::default()))
        .events(quiet_events())
        .build();

    let err = reconcile(&ctx).await.unwrap_err();
    assert!(matches!(err, Error::Resolution { .. }));
    assert_eq!(err.target(), Some("fd00::1"));

    cleanup_namespace(&client, &namespace).await;
}
