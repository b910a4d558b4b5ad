// SPDX-License-Identifier: MIT
//! Shared-dependency negotiation.
//!
//! The host and every remote may declare shared libraries. For a library
//! declared `singleton`, exactly one instance may exist for the lifetime of
//! the application; the [`SharedScope`] is the append-only, first-writer-wins
//! record of which instance won. Version compatibility is a semver range
//! check: a claimant is compatible when its accepted range matches the
//! concrete version already established in the scope. Incompatible singleton
//! claims fail loudly with `SharedDependencyConflict` — that is a host
//! configuration error to fix, not a condition to paper over.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::FederationError;

// ─── ModuleInstance ──────────────────────────────────────────────────────────

/// An opaque, reference-counted module value.
///
/// The runtime never inspects module contents; hosts downcast to the concrete
/// type they expect. Cloning shares the underlying value, which is what makes
/// singleton sharing observable across host and remotes.
#[derive(Clone)]
pub struct ModuleInstance(Arc<dyn Any + Send + Sync>);

impl ModuleInstance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Downcast to the concrete type, sharing ownership on success.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Whether two handles point at the same underlying value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleInstance(..)")
    }
}

// ─── SharedDependencySpec ────────────────────────────────────────────────────

/// One shared-library declaration from a remote's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedDependencySpec {
    /// Library name, e.g. `"react"`.
    pub library: String,
    /// Concrete version this remote ships.
    pub version: Version,
    /// Semver range the remote accepts. Defaults to caret-compatibility with
    /// `version` when omitted from the manifest.
    #[serde(default)]
    pub requirement: Option<VersionReq>,
    /// Only one instance may exist across host and all remotes.
    #[serde(default)]
    pub singleton: bool,
    /// Reconciled synchronously before the remote's entry script executes.
    #[serde(default)]
    pub eager: bool,
}

impl SharedDependencySpec {
    /// The range this spec accepts.
    pub fn range(&self) -> VersionReq {
        match &self.requirement {
            Some(req) => req.clone(),
            None => VersionReq::parse(&format!("^{}", self.version)).unwrap_or(VersionReq::STAR),
        }
    }
}

// ─── SharedScope ─────────────────────────────────────────────────────────────

/// The resolved instance chosen for one library.
#[derive(Debug, Clone)]
pub struct SharedEntry {
    pub version: Version,
    pub instance: ModuleInstance,
}

/// Process-wide library → instance map.
///
/// Created once at host startup and mutated append-only per library name as
/// remotes are negotiated. Entries are never replaced or removed; a page
/// reload is the only teardown.
#[derive(Default)]
pub struct SharedScope {
    entries: Mutex<HashMap<String, SharedEntry>>,
}

impl SharedScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, library: &str) -> Option<SharedEntry> {
        self.entries
            .lock()
            .expect("shared scope poisoned")
            .get(library)
            .cloned()
    }

    /// Seed an instance for `library`, first-writer-wins, no range check.
    ///
    /// This is the host's startup path: the host is the canonical provider
    /// and accepts whatever a faster seed already established. Remotes never
    /// call this; their registrations go through [`provide_checked`] so an
    /// incompatible claim cannot slip in silently.
    ///
    /// Returns the canonical instance: the one just inserted, or the one a
    /// faster writer already established. Callers must use the returned
    /// instance, not the one they offered.
    ///
    /// [`provide_checked`]: SharedScope::provide_checked
    pub fn provide(&self, library: &str, version: Version, instance: ModuleInstance) -> ModuleInstance {
        let mut entries = self.entries.lock().expect("shared scope poisoned");
        match entries.get(library) {
            Some(existing) => existing.instance.clone(),
            None => {
                tracing::debug!(library, version = %version, "shared scope entry established");
                entries.insert(library.to_string(), SharedEntry { version, instance: instance.clone() });
                instance
            }
        }
    }

    /// Register a remote's instance for `library`: establish, reuse, or
    /// conflict — decided atomically under the scope lock.
    ///
    /// Negotiation and establishment are separate steps, so two remotes can
    /// both reconcile against an empty scope and both be told to provide.
    /// The range check must therefore be re-run at the moment of insertion:
    /// the slower claimant either reuses a compatible winner's instance or
    /// fails loudly, never silently runs against an incompatible one.
    ///
    /// This is also the lazy registration hook: a non-eager
    /// `ProvideAndRegister` decision is carried out by the remote itself, on
    /// first import, through this method.
    pub fn provide_checked(
        &self,
        claimant: &str,
        library: &str,
        version: Version,
        requirement: &VersionReq,
        instance: ModuleInstance,
    ) -> Result<ModuleInstance, FederationError> {
        let mut entries = self.entries.lock().expect("shared scope poisoned");
        match entries.get(library) {
            Some(existing) if requirement.matches(&existing.version) => {
                tracing::debug!(
                    claimant,
                    library,
                    established = %existing.version,
                    "lost the establishment race to a compatible instance"
                );
                Ok(existing.instance.clone())
            }
            Some(existing) => {
                tracing::warn!(
                    claimant,
                    library,
                    established = %existing.version,
                    requirement = %requirement,
                    "singleton version conflict at establishment"
                );
                Err(FederationError::SharedDependencyConflict {
                    library: library.to_string(),
                    established: existing.version.to_string(),
                    requirement: requirement.to_string(),
                    remote: claimant.to_string(),
                })
            }
            None => {
                tracing::debug!(claimant, library, version = %version, "shared scope entry established");
                entries.insert(library.to_string(), SharedEntry { version, instance: instance.clone() });
                Ok(instance)
            }
        }
    }

    pub fn libraries(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("shared scope poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("shared scope poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Negotiator ──────────────────────────────────────────────────────────────

/// What a remote must do for one of its shared declarations.
#[derive(Debug, Clone)]
pub enum Decision {
    /// A compatible singleton already exists; reuse it instead of loading a
    /// private copy.
    UseExisting {
        library: String,
        instance: ModuleInstance,
    },
    /// No entry exists yet; this remote's copy becomes the scope entry.
    /// Registration goes through [`SharedScope::provide_checked`] — the
    /// loader carries out eager decisions before the entry executes, the
    /// remote carries out lazy ones on first import — so a concurrent
    /// claimant either converges on one instance or conflicts loudly.
    ProvideAndRegister {
        library: String,
        version: Version,
        requirement: VersionReq,
        eager: bool,
    },
    /// Not declared singleton; the remote keeps a private copy and the scope
    /// is not involved.
    LoadIsolated { library: String },
}

/// Decides, per shared declaration, whether a remote reuses the established
/// instance, provides one, or loads privately.
pub struct SharedDependencyNegotiator {
    scope: Arc<SharedScope>,
}

impl SharedDependencyNegotiator {
    pub fn new(scope: Arc<SharedScope>) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Arc<SharedScope> {
        &self.scope
    }

    /// Reconcile a remote's declarations against the current scope.
    ///
    /// Fails with `SharedDependencyConflict` on the first singleton spec
    /// whose range does not match the established version. Entries already
    /// established stay untouched on failure (append-only scope), so sibling
    /// remotes are unaffected.
    pub fn reconcile(
        &self,
        remote: &str,
        specs: &[SharedDependencySpec],
    ) -> Result<Vec<Decision>, FederationError> {
        let mut decisions = Vec::with_capacity(specs.len());
        for spec in specs {
            if !spec.singleton {
                decisions.push(Decision::LoadIsolated {
                    library: spec.library.clone(),
                });
                continue;
            }
            match self.scope.get(&spec.library) {
                Some(entry) => {
                    let range = spec.range();
                    if range.matches(&entry.version) {
                        tracing::debug!(
                            remote,
                            library = %spec.library,
                            established = %entry.version,
                            "reusing established singleton"
                        );
                        decisions.push(Decision::UseExisting {
                            library: spec.library.clone(),
                            instance: entry.instance,
                        });
                    } else {
                        tracing::warn!(
                            remote,
                            library = %spec.library,
                            established = %entry.version,
                            requirement = %range,
                            "singleton version conflict"
                        );
                        return Err(FederationError::SharedDependencyConflict {
                            library: spec.library.clone(),
                            established: entry.version.to_string(),
                            requirement: range.to_string(),
                            remote: remote.to_string(),
                        });
                    }
                }
                None => decisions.push(Decision::ProvideAndRegister {
                    library: spec.library.clone(),
                    version: spec.version.clone(),
                    requirement: spec.range(),
                    eager: spec.eager,
                }),
            }
        }
        Ok(decisions)
    }
}
