// SPDX-License-Identifier: MIT
//! Load lifecycle.
//!
//! One [`LoadRequest`] per call site, not per module: two components loading
//! the same exposed module each hold their own lifecycle even though they
//! share the underlying cache entry and in-flight work.
//!
//! States: `Idle → Loading → Ready | Error`, with `retry()` taking
//! `Error → Loading`. There is no way out of `Ready` except dropping the
//! request; a new request starts a fresh lifecycle. Observers detach by
//! dropping their [`LoadObserver`], which abandons interest in further
//! notifications but never aborts the in-flight operation — other observers
//! may still be waiting on it.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::FederationError;
use crate::loader::ModuleLoader;
use crate::shared::ModuleInstance;

/// Current position in the load lifecycle.
#[derive(Debug, Clone)]
pub enum LoadState {
    Idle,
    Loading,
    Ready(ModuleInstance),
    Error(FederationError),
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Ready(_) | LoadState::Error(_))
    }
}

/// A per-call-site handle driving one module load.
pub struct LoadRequest {
    remote: String,
    exposed_key: String,
    loader: Arc<ModuleLoader>,
    tx: Arc<watch::Sender<LoadState>>,
}

impl LoadRequest {
    pub(crate) fn new(loader: Arc<ModuleLoader>, remote: String, exposed_key: String) -> Self {
        let (tx, _rx) = watch::channel(LoadState::Idle);
        Self {
            remote,
            exposed_key,
            loader,
            tx: Arc::new(tx),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LoadState {
        self.tx.borrow().clone()
    }

    /// Attach an observer. Drop it to detach.
    pub fn observe(&self) -> LoadObserver {
        LoadObserver {
            rx: self.tx.subscribe(),
        }
    }

    /// Start loading. Returns whether this call started the load; only an
    /// `Idle` request starts, and the check-and-transition is atomic so two
    /// racing callers cannot both start.
    pub fn begin(&self) -> bool {
        let started = self.tx.send_if_modified(|state| {
            if matches!(state, LoadState::Idle) {
                *state = LoadState::Loading;
                true
            } else {
                false
            }
        });
        if started {
            self.spawn_load();
        }
        started
    }

    /// Re-attempt a failed load. Returns whether this call restarted it;
    /// only an `Error` request restarts, atomically like [`begin`].
    ///
    /// Failed fetches were never cached, so this naturally triggers a fresh
    /// attempt through the ordinary path rather than a special retry one.
    ///
    /// [`begin`]: LoadRequest::begin
    pub fn retry(&self) -> bool {
        let started = self.tx.send_if_modified(|state| {
            if matches!(state, LoadState::Error(_)) {
                *state = LoadState::Loading;
                true
            } else {
                false
            }
        });
        if started {
            self.spawn_load();
        } else {
            tracing::debug!(
                remote = %self.remote,
                key = %self.exposed_key,
                "retry ignored: request is not in the error state"
            );
        }
        started
    }

    fn spawn_load(&self) {
        let loader = Arc::clone(&self.loader);
        let tx = Arc::clone(&self.tx);
        let remote = self.remote.clone();
        let exposed_key = self.exposed_key.clone();
        tokio::spawn(async move {
            let next = match loader.get_module(&remote, &exposed_key).await {
                Ok(instance) => LoadState::Ready(instance),
                Err(e) => {
                    tracing::warn!(remote = %remote, key = %exposed_key, error = %e, "load failed");
                    LoadState::Error(e)
                }
            };
            // No receivers left means every observer detached; the resolution
            // still completed for whoever shares the underlying flight.
            let _ = tx.send(next);
        });
    }
}

/// A detachable view of one request's state transitions.
pub struct LoadObserver {
    rx: watch::Receiver<LoadState>,
}

impl LoadObserver {
    pub fn state(&self) -> LoadState {
        self.rx.borrow().clone()
    }

    /// Wait for the next transition. Returns `None` once the request side has
    /// gone away and no further transitions can happen.
    pub async fn changed(&mut self) -> Option<LoadState> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }

    /// Wait until the request reaches `Ready` or `Error`.
    pub async fn wait_terminal(&mut self) -> LoadState {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, ContainerInstantiator, ContainerLoader};
    use crate::fetch::ManifestFetcher;
    use crate::manifest::{ChunkRef, ManifestResolver};
    use crate::registry::RemoteRegistry;
    use crate::shared::SharedScope;
    use async_trait::async_trait;

    struct NoFetch;
    #[async_trait]
    impl ManifestFetcher for NoFetch {
        async fn fetch(&self, _url: &str) -> anyhow::Result<String> {
            anyhow::bail!("unreachable")
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

    fn loader_without_remotes() -> Arc<ModuleLoader> {
        Arc::new(ModuleLoader::new(
            Arc::new(RemoteRegistry::new()),
            Arc::new(ManifestResolver::new(Arc::new(NoFetch))),
            Arc::new(ContainerLoader::new(
                Arc::new(NoInstantiate),
                Arc::new(SharedScope::new()),
            )),
        ))
    }

    #[tokio::test]
    async fn request_starts_idle_and_fails_into_error() {
        let request = LoadRequest::new(loader_without_remotes(), "ghost".into(), "./app".into());
        assert!(matches!(request.state(), LoadState::Idle));

        let mut observer = request.observe();
        request.begin();
        let terminal = observer.wait_terminal().await;
        assert!(matches!(
            terminal,
            LoadState::Error(FederationError::RemoteNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn begin_is_ignored_once_loading_or_done() {
        let request = LoadRequest::new(loader_without_remotes(), "ghost".into(), "./app".into());
        let mut observer = request.observe();

        // Only the first begin() wins the Idle → Loading transition; a
        // second caller arriving while Loading gets a refusal, not a
        // duplicate spawn.
        assert!(request.begin());
        assert!(!request.begin());
        observer.wait_terminal().await;

        // Error state: begin() must not restart either; only retry() may.
        assert!(!request.begin());
        assert!(matches!(request.state(), LoadState::Error(_)));
    }

    #[tokio::test]
    async fn retry_from_error_transitions_back_through_loading() {
        let request = LoadRequest::new(loader_without_remotes(), "ghost".into(), "./app".into());
        let mut observer = request.observe();
        request.begin();
        observer.wait_terminal().await;

        assert!(request.retry());
        // Immediately after retry the request is Loading again (the failing
        // resolution happens on a spawned task).
        let mut observer = request.observe();
        let terminal = observer.wait_terminal().await;
        assert!(matches!(terminal, LoadState::Error(_)));
    }

    #[tokio::test]
    async fn retry_is_ignored_when_not_in_error() {
        let request = LoadRequest::new(loader_without_remotes(), "ghost".into(), "./app".into());
        assert!(!request.retry());
        assert!(matches!(request.state(), LoadState::Idle));
    }
}
