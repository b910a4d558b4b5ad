// SPDX-License-Identifier: MIT
//! Container loading.
//!
//! A remote's entry chunks, once fetched and evaluated, yield a *container*:
//! an object exposing `init(shared_scope)` and `get(exposed_key)`. The
//! mechanism that turns chunk refs into a live container is behind the
//! [`ContainerInstantiator`] trait so it can be a network script loader in
//! production and an in-memory double in tests, without touching the
//! negotiation or caching logic.
//!
//! Ordering guarantees enforced here:
//! - shared-dependency reconciliation (including materializing eager
//!   `ProvideAndRegister` instances) completes before the remote's entry
//!   executes, so the first evaluated script sees a consistent scope;
//! - `init` is called exactly once per container, and a handle is cached
//!   only after `init` returns cleanly;
//! - concurrent loads for one remote share a single in-flight operation.
//!   Duplicate execution of an entry script is a correctness bug (it can
//!   re-register a singleton twice), not just wasted work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semver::Version;

use crate::error::FederationError;
use crate::flight::SingleFlight;
use crate::manifest::{ChunkRef, RemoteManifest};
use crate::shared::{Decision, ModuleInstance, SharedDependencyNegotiator, SharedScope};

/// The runtime object a remote's entry registers.
#[async_trait]
pub trait Container: Send + Sync {
    /// Inject the negotiated shared scope. Called exactly once per container;
    /// idempotent on success is the contract the remote must honor.
    async fn init(&self, scope: Arc<SharedScope>) -> anyhow::Result<()>;

    /// Resolve one exposed module.
    async fn get(&self, exposed_key: &str) -> anyhow::Result<ModuleInstance>;
}

/// Pluggable `fetch-and-instantiate` capability.
///
/// Production hosts fetch and evaluate scripts; tests hand back in-memory
/// containers. `instantiate_shared` materializes a remote's own copy of a
/// shared library for an eager `ProvideAndRegister` decision, since the
/// instantiator is the one component able to load code.
#[async_trait]
pub trait ContainerInstantiator: Send + Sync {
    async fn fetch_and_instantiate(
        &self,
        remote: &str,
        entry_refs: &[ChunkRef],
    ) -> anyhow::Result<Arc<dyn Container>>;

    async fn instantiate_shared(
        &self,
        remote: &str,
        library: &str,
        version: &Version,
    ) -> anyhow::Result<ModuleInstance>;
}

/// A live, initialized container. One per remote, cached by the loader for
/// the process lifetime.
#[derive(Clone)]
pub struct ContainerHandle {
    pub remote_name: String,
    /// True from the moment the handle exists; a handle is only constructed
    /// after `init` returned without error.
    pub initialized: bool,
    container: Arc<dyn Container>,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("remote_name", &self.remote_name)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl ContainerHandle {
    pub async fn get(&self, exposed_key: &str) -> Result<ModuleInstance, FederationError> {
        self.container
            .get(exposed_key)
            .await
            .map_err(|e| FederationError::ContainerFetch {
                remote: self.remote_name.clone(),
                reason: format!("get('{exposed_key}'): {e:#}"),
            })
    }
}

/// Fetches entry chunks, reconciles shared dependencies, initializes the
/// container, and caches one handle per remote.
pub struct ContainerLoader {
    instantiator: Arc<dyn ContainerInstantiator>,
    negotiator: Arc<SharedDependencyNegotiator>,
    scope: Arc<SharedScope>,
    handles: Arc<Mutex<HashMap<String, ContainerHandle>>>,
    flights: SingleFlight<String, ContainerHandle>,
}

impl ContainerLoader {
    pub fn new(instantiator: Arc<dyn ContainerInstantiator>, scope: Arc<SharedScope>) -> Self {
        Self {
            instantiator,
            negotiator: Arc::new(SharedDependencyNegotiator::new(Arc::clone(&scope))),
            scope,
            handles: Arc::new(Mutex::new(HashMap::new())),
            flights: SingleFlight::new(),
        }
    }

    /// Load (or return the cached) container for `remote`.
    pub async fn load(
        &self,
        remote: &str,
        manifest: &Arc<RemoteManifest>,
    ) -> Result<ContainerHandle, FederationError> {
        if let Some(handle) = self.handles.lock().expect("handle cache poisoned").get(remote) {
            return Ok(handle.clone());
        }

        let instantiator = Arc::clone(&self.instantiator);
        let negotiator = Arc::clone(&self.negotiator);
        let scope = Arc::clone(&self.scope);
        let handles = Arc::clone(&self.handles);
        let manifest = Arc::clone(manifest);
        let remote = remote.to_string();

        self.flights
            .run(remote.clone(), move || async move {
                // Reconcile before any remote code runs. A conflict here is
                // fatal to this remote only; the scope is append-only so
                // nothing needs rolling back.
                let decisions = negotiator.reconcile(&remote, &manifest.shared_dependencies)?;
                for decision in &decisions {
                    let Decision::ProvideAndRegister { library, version, requirement, eager: true } =
                        decision
                    else {
                        continue;
                    };
                    let instance = instantiator
                        .instantiate_shared(&remote, library, version)
                        .await
                        .map_err(|e| FederationError::ContainerFetch {
                            remote: remote.clone(),
                            reason: format!("eager shared '{library}': {e:#}"),
                        })?;
                    // Establishment re-checks the range under the scope lock:
                    // a concurrent remote may have won the race since
                    // reconciliation saw an empty slot.
                    scope.provide_checked(&remote, library, version.clone(), requirement, instance)?;
                }

                let container = instantiator
                    .fetch_and_instantiate(&remote, &manifest.container_entry_refs)
                    .await
                    .map_err(|e| FederationError::ContainerFetch {
                        remote: remote.clone(),
                        reason: format!("{e:#}"),
                    })?;

                container
                    .init(Arc::clone(&scope))
                    .await
                    .map_err(|e| FederationError::ContainerInit {
                        remote: remote.clone(),
                        reason: format!("{e:#}"),
                    })?;

                let handle = ContainerHandle {
                    remote_name: remote.clone(),
                    initialized: true,
                    container,
                };
                handles
                    .lock()
                    .expect("handle cache poisoned")
                    .insert(remote.clone(), handle.clone());
                tracing::info!(remote = %remote, "container initialized");
                Ok(handle)
            })
            .await
    }

    /// Drop the cached handle for `remote` (re-registration at a new URL).
    pub fn invalidate(&self, remote: &str) -> bool {
        self.handles
            .lock()
            .expect("handle cache poisoned")
            .remove(remote)
            .is_some()
    }
}
