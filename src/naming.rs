//! Naming Service
//!
//! Resolves a replica location to a callable peer handle. Replicas are bound
//! under `Replica<id>`; a location without a binding falls back to the address
//! it carries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::network::NetworkClient;
use crate::replication::{RemotePeer, ReplicaLocation, ReplicaPeer};

/// Registry name of a replica
pub fn replica_name(id: u32) -> String {
    format!("Replica{}", id)
}

/// Resolves replica locations to peer handles
#[async_trait::async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, location: &ReplicaLocation) -> Result<Arc<dyn ReplicaPeer>>;
}

/// Static name -> address registry
pub struct Registry {
    bindings: RwLock<HashMap<String, String>>,
    client: NetworkClient,
}

impl Registry {
    /// Create an empty registry whose peers call through `client`
    pub fn new(client: NetworkClient) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            client,
        }
    }

    /// Create a registry preloaded from the `[registry]` section
    pub fn from_config(config: &RegistryConfig, client: NetworkClient) -> Self {
        let bindings = config
            .replicas
            .iter()
            .map(|loc| (replica_name(loc.id), loc.address.clone()))
            .collect();

        Self {
            bindings: RwLock::new(bindings),
            client,
        }
    }

    /// Bind a name to an address, replacing any previous binding
    pub async fn bind(&self, name: impl Into<String>, address: impl Into<String>) {
        let name = name.into();
        let address = address.into();
        tracing::debug!("Bound {} -> {}", name, address);
        self.bindings.write().await.insert(name, address);
    }

    /// Remove a binding
    pub async fn unbind(&self, name: &str) -> Option<String> {
        self.bindings.write().await.remove(name)
    }

    /// Look up a bound address
    pub async fn lookup(&self, name: &str) -> Option<String> {
        self.bindings.read().await.get(name).cloned()
    }
}

#[async_trait::async_trait]
impl NameResolver for Registry {
    async fn resolve(&self, location: &ReplicaLocation) -> Result<Arc<dyn ReplicaPeer>> {
        let name = replica_name(location.id);

        let address = match self.lookup(&name).await {
            Some(address) => address,
            None if !location.address.is_empty() => location.address.clone(),
            None => return Err(Error::NotBound(name)),
        };

        Ok(Arc::new(RemotePeer::new(
            location.clone(),
            address,
            self.client.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_binding_wins_over_location_address() {
        let registry = Registry::new(NetworkClient::default());
        registry.bind(replica_name(2), "10.0.0.2:7700").await;

        let peer = registry
            .resolve(&ReplicaLocation::new(2, "stale:1"))
            .await
            .unwrap();
        assert_eq!(peer.location().id, 2);
    }

    #[tokio::test]
    async fn test_unbound_location_without_address() {
        let registry = Registry::new(NetworkClient::default());

        let result = registry.resolve(&ReplicaLocation::new(9, "")).await;
        assert!(matches!(result, Err(Error::NotBound(name)) if name == "Replica9"));

        assert!(registry.resolve(&ReplicaLocation::new(9, "127.0.0.1:7709")).await.is_ok());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = RegistryConfig {
            replicas: vec![ReplicaLocation::new(1, "a:1"), ReplicaLocation::new(2, "b:2")],
        };
        let registry = Registry::from_config(&config, NetworkClient::default());

        assert_eq!(registry.lookup("Replica2").await.as_deref(), Some("b:2"));
        assert_eq!(registry.unbind("Replica1").await.as_deref(), Some("a:1"));
        assert!(registry.lookup("Replica1").await.is_none());
    }
}
