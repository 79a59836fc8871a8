//! Stories about the tracking ConfigMap bootstrap
//!
//! The operator must create its tracking ConfigMap on first start and must
//! never replace one an administrator already filled in.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;

use byoh_operator::tracking::{ensure_instances_config_map, ObjectIdentity};
use byoh_operator::INSTANCES_CONFIG_MAP;

use super::helpers::{cleanup_namespace, ensure_test_cluster, test_namespace, write_record};

/// Story: the operator starts in a namespace without a tracking ConfigMap
///
/// Expected behavior:
/// - The ConfigMap is created with no data
/// - Running the bootstrap again is a no-op
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_first_start_creates_empty_configmap() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-bootstrap").await;
    let identity = ObjectIdentity::new(&namespace, INSTANCES_CONFIG_MAP);
    let config = kube::Config::infer().await.expect("kubeconfig");

    ensure_instances_config_map(Some(config.clone()), &identity)
        .await
        .expect("bootstrap should succeed");
    ensure_instances_config_map(Some(config), &identity)
        .await
        .expect("second bootstrap should succeed");

    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let cm = api.get(INSTANCES_CONFIG_MAP).await.expect("configmap exists");
    assert!(cm.data.unwrap_or_default().is_empty());

    cleanup_namespace(&client, &namespace).await;
}

/// Story: an administrator pre-created the host list before installing
///
/// Expected behavior:
/// - The bootstrap leaves the existing entries untouched
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_existing_host_list_is_never_overwritten() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = test_namespace(&client, "byoh-preexisting").await;
    let identity = ObjectIdentity::new(&namespace, INSTANCES_CONFIG_MAP);

    write_record(&client, &identity, &[("10.0.0.5", "username=admin")]).await;

    let config = kube::Config::infer().await.expect("kubeconfig");
    ensure_instances_config_map(Some(config), &identity)
        .await
        .expect("bootstrap should succeed");

    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let data = api
        .get(INSTANCES_CONFIG_MAP)
        .await
        .expect("configmap exists")
        .data
        .unwrap_or_default();
    assert_eq!(data.get("10.0.0.5").map(String::as_str), Some("username=admin"));

    cleanup_namespace(&client, &namespace).await;
}
