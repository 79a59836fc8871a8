//! Tracking resource bootstrap
//!
//! The tracking resource is a single ConfigMap whose data is the desired-state
//! record. It is created empty whenever it is missing; a missing resource is
//! never an error, it simply means "no hosts are desired".

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, Config};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

/// Namespaced name of a singleton object the operator owns
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectIdentity {
    /// Create a new identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether an object with the given metadata has this identity
    pub fn matches(&self, namespace: Option<&str>, name: Option<&str>) -> bool {
        namespace == Some(self.namespace.as_str()) && name == Some(self.name.as_str())
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Trait abstracting reads and creates of the tracking ConfigMap
///
/// `get` must return an error for which [`Error::is_not_found`] is true when
/// the ConfigMap does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Read the ConfigMap with the given identity
    async fn get(&self, identity: &ObjectIdentity) -> Result<ConfigMap, Error>;

    /// Create the given ConfigMap
    async fn create(&self, config_map: &ConfigMap) -> Result<(), Error>;
}

/// Tracking store that talks to the API server directly
pub struct KubeTrackingStore {
    client: Client,
}

impl KubeTrackingStore {
    /// Create a new KubeTrackingStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrackingStore for KubeTrackingStore {
    async fn get(&self, identity: &ObjectIdentity) -> Result<ConfigMap, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &identity.namespace);
        Ok(api.get(&identity.name).await?)
    }

    async fn create(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("tracking", "ConfigMap has no namespace"))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }
}

/// Build an empty ConfigMap with the given identity
pub fn empty_config_map(identity: &ObjectIdentity) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(identity.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Return the tracking ConfigMap, creating it empty if it does not exist
///
/// Create-if-absent, never create-or-replace: an existing ConfigMap is
/// returned untouched, including one another process created between our read
/// and our create. Errors other than not-found propagate unchanged.
#[instrument(skip(store), fields(configmap = %identity))]
pub async fn ensure_tracking_resource<S>(
    store: &S,
    identity: &ObjectIdentity,
) -> Result<ConfigMap, Error>
where
    S: TrackingStore + ?Sized,
{
    match store.get(identity).await {
        Ok(config_map) => Ok(config_map),
        Err(e) if e.is_not_found() => {
            match store.create(&empty_config_map(identity)).await {
                Ok(()) => info!(configmap = %identity, "Created"),
                // Lost a race with another creator; the existing one wins
                Err(e) if e.is_already_exists() => {
                    debug!(configmap = %identity, "created concurrently")
                }
                Err(e) => return Err(e),
            }
            store.get(identity).await
        }
        Err(e) => Err(e),
    }
}

/// Ensure the tracking ConfigMap exists during operator startup
///
/// Builds its own client from `config` and talks to the API server directly,
/// so it can run before any watcher has observed the cluster.
pub async fn ensure_instances_config_map(
    config: Option<Config>,
    identity: &ObjectIdentity,
) -> Result<(), Error> {
    let config = config
        .ok_or_else(|| Error::internal_with_context("startup", "config should not be None"))?;
    let client = Client::try_from(config).map_err(|e| {
        Error::internal_with_context("startup", format!("error creating client: {}", e))
    })?;

    ensure_tracking_resource(&KubeTrackingStore::new(client), identity).await?;
    Ok(())
}
