//! Signing credential used to authenticate to hosts
//!
//! The private key lives in a Secret with a fixed, well-known name in the
//! operator namespace. It is loaded fresh on every pass that touches a host
//! and is never cached between passes.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::tracking::ObjectIdentity;

/// Key within the secret holding the PEM-encoded private key
pub const PRIVATE_KEY_SECRET_KEY: &str = "private-key.pem";

const PEM_PREFIX: &str = "-----BEGIN ";

/// Credential handed to the provisioning collaborator
///
/// The key material is wiped from memory when the signer is dropped and is
/// never printed by `Debug`.
#[derive(Clone)]
pub struct Signer {
    private_key: Zeroizing<Vec<u8>>,
}

impl Signer {
    /// Build a signer from PEM-encoded private key bytes
    pub fn from_pem(secret: &str, pem: Vec<u8>) -> Result<Self, Error> {
        let pem = Zeroizing::new(pem);
        let text = std::str::from_utf8(&pem)
            .map_err(|_| Error::credential(secret, "private key is not valid UTF-8"))?;
        if text.trim().is_empty() {
            return Err(Error::credential(secret, "private key is empty"));
        }
        if !text.trim_start().starts_with(PEM_PREFIX) {
            return Err(Error::credential(secret, "private key is not PEM encoded"));
        }
        Ok(Self { private_key: pem })
    }

    /// PEM-encoded private key bytes
    pub fn private_key_pem(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Trait abstracting the secret store holding the signing key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Load the signer stored in the secret `identity`
    async fn load_signer(&self, identity: &ObjectIdentity) -> Result<Signer, Error>;
}

/// Secret store backed by Kubernetes Secrets
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Create a new KubeSecretStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn load_signer(&self, identity: &ObjectIdentity) -> Result<Signer, Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &identity.namespace);
        let secret = secrets
            .get(&identity.name)
            .await
            .map_err(|e| Error::credential(identity.to_string(), e.to_string()))?;

        let pem = secret
            .data
            .and_then(|mut d| d.remove(PRIVATE_KEY_SECRET_KEY))
            .ok_or_else(|| {
                Error::credential(
                    identity.to_string(),
                    format!("secret is missing key {}", PRIVATE_KEY_SECRET_KEY),
                )
            })?;

        debug!(secret = %identity, "loaded private key");
        Signer::from_pem(&identity.to_string(), pem.0)
    }
}
