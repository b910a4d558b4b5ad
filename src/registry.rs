// SPDX-License-Identifier: MIT
//! Remote registry — name → manifest-URL bindings.
//!
//! The registry is the source of truth for which remotes exist. It holds no
//! caches itself; when a re-registration changes a remote's manifest URL the
//! caller (the host) is told so it can invalidate the manifest, container,
//! and module caches for that name.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::FederationError;

/// A name → manifest-URL binding. Immutable once created; registry entries
/// are replaced whole, never partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    /// Unique remote name, e.g. `"providerA"`.
    pub name: String,
    /// URL of the remote's manifest document, e.g.
    /// `"http://localhost:3001/mf-manifest.json"`.
    pub manifest_url: String,
}

impl RemoteDescriptor {
    pub fn new(name: impl Into<String>, manifest_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manifest_url: manifest_url.into(),
        }
    }
}

/// Outcome of a `register` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The name was not previously bound.
    Inserted,
    /// The name was bound to the same URL already; no observable effect.
    Unchanged,
    /// The name was re-bound to a different URL. Cached state derived from
    /// `previous_url` must be invalidated by the caller.
    Replaced { previous_url: String },
}

/// Name → descriptor map, safe for concurrent access.
#[derive(Default)]
pub struct RemoteRegistry {
    remotes: Mutex<HashMap<String, RemoteDescriptor>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a binding by name. Idempotent: registering an
    /// identical descriptor twice reports `Unchanged`.
    pub fn register(&self, descriptor: RemoteDescriptor) -> Registration {
        let mut remotes = self.remotes.lock().expect("registry poisoned");
        match remotes.insert(descriptor.name.clone(), descriptor.clone()) {
            None => Registration::Inserted,
            Some(previous) if previous.manifest_url == descriptor.manifest_url => {
                Registration::Unchanged
            }
            Some(previous) => Registration::Replaced {
                previous_url: previous.manifest_url,
            },
        }
    }

    /// Remove a binding. Returns the removed descriptor, if any.
    pub fn unregister(&self, name: &str) -> Option<RemoteDescriptor> {
        self.remotes.lock().expect("registry poisoned").remove(name)
    }

    /// Look up a remote by name.
    pub fn resolve(&self, name: &str) -> Result<RemoteDescriptor, FederationError> {
        self.remotes
            .lock()
            .expect("registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| FederationError::RemoteNotRegistered(name.to_string()))
    }

    /// Names of all registered remotes.
    pub fn names(&self) -> Vec<String> {
        self.remotes
            .lock()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolve_unregister_cycle() {
        let registry = RemoteRegistry::new();
        let d = RemoteDescriptor::new("providerA", "http://localhost:3001/mf-manifest.json");

        assert_eq!(registry.register(d.clone()), Registration::Inserted);
        assert_eq!(registry.resolve("providerA").unwrap(), d);

        assert_eq!(registry.unregister("providerA"), Some(d));
        assert!(matches!(
            registry.resolve("providerA"),
            Err(FederationError::RemoteNotRegistered(_))
        ));
    }

    #[test]
    fn identical_re_registration_is_unchanged() {
        let registry = RemoteRegistry::new();
        let d = RemoteDescriptor::new("providerA", "http://localhost:3001/mf-manifest.json");
        registry.register(d.clone());
        assert_eq!(registry.register(d), Registration::Unchanged);
    }

    #[test]
    fn re_registration_with_new_url_reports_previous() {
        let registry = RemoteRegistry::new();
        registry.register(RemoteDescriptor::new("providerA", "http://old/mf-manifest.json"));
        let outcome =
            registry.register(RemoteDescriptor::new("providerA", "http://new/mf-manifest.json"));
        assert_eq!(
            outcome,
            Registration::Replaced {
                previous_url: "http://old/mf-manifest.json".into()
            }
        );
        assert_eq!(
            registry.resolve("providerA").unwrap().manifest_url,
            "http://new/mf-manifest.json"
        );
    }
}
