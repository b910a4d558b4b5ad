// SPDX-License-Identifier: MIT
//! Module cache & coalescer.
//!
//! `get_module` is the whole pipeline: registry lookup → manifest resolve →
//! container load → `container.get(key)`. Each async stage coalesces
//! concurrent identical requests independently, so N simultaneous callers for
//! one `(remote, key)` produce exactly one manifest fetch, one container
//! load, and one `get` call. Resolved values are cached per key; failures are
//! not, so a fresh call after a transient failure retries the full chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::container::ContainerLoader;
use crate::error::FederationError;
use crate::manifest::ManifestResolver;
use crate::registry::RemoteRegistry;
use crate::shared::ModuleInstance;

type ModuleKey = (String, String);

/// Resolves exposed modules, caching per `(remote, exposed_key)`.
pub struct ModuleLoader {
    registry: Arc<RemoteRegistry>,
    manifests: Arc<ManifestResolver>,
    containers: Arc<ContainerLoader>,
    cache: Arc<Mutex<HashMap<ModuleKey, ModuleInstance>>>,
    flights: SingleFlightByKey,
}

type SingleFlightByKey = crate::flight::SingleFlight<ModuleKey, ModuleInstance>;

impl ModuleLoader {
    pub fn new(
        registry: Arc<RemoteRegistry>,
        manifests: Arc<ManifestResolver>,
        containers: Arc<ContainerLoader>,
    ) -> Self {
        Self {
            registry,
            manifests,
            containers,
            cache: Arc::new(Mutex::new(HashMap::new())),
            flights: SingleFlightByKey::new(),
        }
    }

    /// Resolve one exposed module from one remote.
    pub async fn get_module(
        &self,
        remote: &str,
        exposed_key: &str,
    ) -> Result<ModuleInstance, FederationError> {
        let key: ModuleKey = (remote.to_string(), exposed_key.to_string());
        if let Some(cached) = self.cache.lock().expect("module cache poisoned").get(&key) {
            return Ok(cached.clone());
        }

        let registry = Arc::clone(&self.registry);
        let manifests = Arc::clone(&self.manifests);
        let containers = Arc::clone(&self.containers);
        let cache = Arc::clone(&self.cache);

        self.flights
            .run(key.clone(), move || async move {
                let (remote, exposed_key) = key;
                let descriptor = registry.resolve(&remote)?;
                let manifest = manifests.resolve(&descriptor.manifest_url).await?;

                // Manifest inspection only: a key the remote never exposed is
                // a configuration error and must not reach the container.
                if !manifest.exposes(&exposed_key) {
                    return Err(FederationError::ExposedModuleNotFound {
                        remote: remote.clone(),
                        key: exposed_key.clone(),
                    });
                }

                let handle = containers.load(&remote, &manifest).await?;
                let instance = handle.get(&exposed_key).await?;
                tracing::debug!(remote = %remote, key = %exposed_key, "module resolved");
                cache
                    .lock()
                    .expect("module cache poisoned")
                    .insert((remote, exposed_key), instance.clone());
                Ok(instance)
            })
            .await
    }

    /// Drop every cached module belonging to `remote`. Returns how many
    /// entries were removed.
    pub fn invalidate_remote(&self, remote: &str) -> usize {
        let mut cache = self.cache.lock().expect("module cache poisoned");
        let before = cache.len();
        cache.retain(|(r, _), _| r != remote);
        before - cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ModuleInstance;

    fn empty_loader() -> ModuleLoader {
        use crate::container::{Container, ContainerInstantiator};
        use crate::fetch::ManifestFetcher;
        use crate::manifest::ChunkRef;
        use crate::shared::SharedScope;
        use async_trait::async_trait;

        struct NoFetch;
        #[async_trait]
        impl ManifestFetcher for NoFetch {
            async fn fetch(&self, url: &str) -> anyhow::Result<String> {
                anyhow::bail!("unreachable {url}")
            }
        }

        struct NoInstantiate;
        #[async_trait]
        impl ContainerInstantiator for NoInstantiate {
            async fn fetch_and_instantiate(
                &self,
                _remote: &str,
                _entry_refs: &[ChunkRef],
            ) -> anyhow::Result<Arc<dyn Container>> {
                anyhow::bail!("unreachable")
            }
            async fn instantiate_shared(
                &self,
                _remote: &str,
                _library: &str,
                _version: &semver::Version,
            ) -> anyhow::Result<ModuleInstance> {
                anyhow::bail!("unreachable")
            }
        }

        let scope = Arc::new(SharedScope::new());
        ModuleLoader::new(
            Arc::new(RemoteRegistry::new()),
            Arc::new(ManifestResolver::new(Arc::new(NoFetch))),
            Arc::new(ContainerLoader::new(Arc::new(NoInstantiate), scope)),
        )
    }

    #[tokio::test]
    async fn unregistered_remote_fails_before_any_network() {
        let loader = empty_loader();
        let err = loader.get_module("ghost", "./app").await.unwrap_err();
        assert!(matches!(err, FederationError::RemoteNotRegistered(name) if name == "ghost"));
    }

    #[test]
    fn invalidate_remote_only_touches_that_remote() {
        let loader = empty_loader();
        {
            let mut cache = loader.cache.lock().unwrap();
            cache.insert(("a".into(), "./x".into()), ModuleInstance::new(1_u8));
            cache.insert(("a".into(), "./y".into()), ModuleInstance::new(2_u8));
            cache.insert(("b".into(), "./x".into()), ModuleInstance::new(3_u8));
        }
        assert_eq!(loader.invalidate_remote("a"), 2);
        assert_eq!(loader.cache.lock().unwrap().len(), 1);
    }
}
