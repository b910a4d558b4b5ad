// SPDX-License-Identifier: MIT
//! weft — runtime module-federation loader.
//!
//! Assembles a host application's UI at runtime from independently built,
//! deployed, and versioned remote bundles. The host knows only a remote's
//! name and manifest URL; no remote code exists at host build time.
//!
//! The [`FederationHost`] is the explicit process-wide context: registry,
//! shared scope, and caches live in it, never in implicit globals, so tests
//! construct fresh hosts at will.

pub mod config;
pub mod container;
pub mod error;
pub mod fetch;
pub mod flight;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod routing;
pub mod shared;

use std::any::Any;
use std::sync::Arc;

use semver::Version;

pub use config::HostConfig;
pub use container::{Container, ContainerHandle, ContainerInstantiator, ContainerLoader};
pub use error::FederationError;
pub use fetch::{HttpManifestFetcher, ManifestFetcher};
pub use lifecycle::{LoadObserver, LoadRequest, LoadState};
pub use loader::ModuleLoader;
pub use manifest::{ChunkRef, ManifestResolver, RemoteManifest};
pub use registry::{Registration, RemoteDescriptor, RemoteRegistry};
pub use routing::MountPoint;
pub use shared::{
    Decision, ModuleInstance, SharedDependencyNegotiator, SharedDependencySpec, SharedEntry,
    SharedScope,
};

/// The composing application's entry point to the federation runtime.
pub struct FederationHost {
    config: HostConfig,
    registry: Arc<RemoteRegistry>,
    scope: Arc<SharedScope>,
    manifests: Arc<ManifestResolver>,
    containers: Arc<ContainerLoader>,
    loader: Arc<ModuleLoader>,
}

impl FederationHost {
    /// Build a host over explicit fetcher and instantiator implementations.
    /// Remotes listed in the config are registered immediately.
    pub fn new(
        config: HostConfig,
        fetcher: Arc<dyn ManifestFetcher>,
        instantiator: Arc<dyn ContainerInstantiator>,
    ) -> Arc<Self> {
        let registry = Arc::new(RemoteRegistry::new());
        let scope = Arc::new(SharedScope::new());
        let manifests = Arc::new(ManifestResolver::new(fetcher));
        let containers = Arc::new(ContainerLoader::new(instantiator, Arc::clone(&scope)));
        let loader = Arc::new(ModuleLoader::new(
            Arc::clone(&registry),
            Arc::clone(&manifests),
            Arc::clone(&containers),
        ));

        let host = Arc::new(Self {
            config,
            registry,
            scope,
            manifests,
            containers,
            loader,
        });
        host.register_remotes(host.config.remotes.clone());
        host
    }

    /// Build a host that fetches manifests over HTTP.
    pub fn over_http(
        config: HostConfig,
        instantiator: Arc<dyn ContainerInstantiator>,
    ) -> anyhow::Result<Arc<Self>> {
        let fetcher = Arc::new(HttpManifestFetcher::new(&config)?);
        Ok(Self::new(config, fetcher, instantiator))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn shared_scope(&self) -> &Arc<SharedScope> {
        &self.scope
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Register a batch of remotes.
    pub fn register_remotes(&self, descriptors: Vec<RemoteDescriptor>) {
        for descriptor in descriptors {
            self.register_remote(descriptor);
        }
    }

    /// Insert or replace one binding. Re-registering a name at a different
    /// URL models redeploying that remote: every cache derived from the old
    /// location is dropped so the next access re-resolves from scratch.
    pub fn register_remote(&self, descriptor: RemoteDescriptor) {
        let name = descriptor.name.clone();
        match self.registry.register(descriptor) {
            Registration::Inserted => {
                tracing::info!(remote = %name, "remote registered");
            }
            Registration::Unchanged => {}
            Registration::Replaced { previous_url } => {
                self.manifests.invalidate(&previous_url);
                self.containers.invalidate(&name);
                let dropped = self.loader.invalidate_remote(&name);
                tracing::info!(
                    remote = %name,
                    dropped_modules = dropped,
                    "remote re-registered at new manifest URL, caches invalidated"
                );
            }
        }
    }

    /// Remove a binding and every cache derived from it.
    pub fn unregister_remote(&self, name: &str) {
        if let Some(descriptor) = self.registry.unregister(name) {
            self.manifests.invalidate(&descriptor.manifest_url);
            self.containers.invalidate(name);
            self.loader.invalidate_remote(name);
            tracing::info!(remote = %name, "remote unregistered");
        }
    }

    // ─── Shared dependencies ─────────────────────────────────────────────────

    /// Seed the shared scope with one of the host's own libraries, before any
    /// remote loads. First-writer-wins applies here too, so seeding at
    /// startup is what makes the host the canonical provider.
    pub fn provide_shared<T: Any + Send + Sync>(
        &self,
        library: &str,
        version: Version,
        value: T,
    ) -> ModuleInstance {
        self.scope.provide(library, version, ModuleInstance::new(value))
    }

    // ─── Module loading ──────────────────────────────────────────────────────

    /// Resolve one exposed module from one remote.
    pub async fn get_module(
        &self,
        remote: &str,
        exposed_key: &str,
    ) -> Result<ModuleInstance, FederationError> {
        self.loader.get_module(remote, exposed_key).await
    }

    /// Resolve a `"remote/key"` spec, e.g. `"providerA/app"` for remote
    /// `providerA`'s exposed module `./app`.
    pub async fn load_remote(&self, spec: &str) -> Result<ModuleInstance, FederationError> {
        let Some((remote, key)) = spec.split_once('/') else {
            return Err(FederationError::RemoteNotRegistered(spec.to_string()));
        };
        let exposed_key = if key.starts_with("./") {
            key.to_string()
        } else {
            format!("./{key}")
        };
        self.get_module(remote, &exposed_key).await
    }

    /// Create a lifecycle request for one call site. The request starts
    /// `Idle`; call [`LoadRequest::begin`] to drive it.
    pub fn load(&self, remote: &str, exposed_key: &str) -> LoadRequest {
        LoadRequest::new(
            Arc::clone(&self.loader),
            remote.to_string(),
            exposed_key.to_string(),
        )
    }

    // ─── Routing bridge ──────────────────────────────────────────────────────

    /// The base-path handshake handed to a mounted remote.
    pub fn mount(&self, remote: &str, base_path: &str) -> MountPoint {
        MountPoint::new(remote, base_path)
    }
}
