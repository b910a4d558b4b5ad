// SPDX-License-Identifier: MIT
//! Manifest document model and resolver.
//!
//! A remote publishes a JSON manifest (conventionally `mf-manifest.json`)
//! describing what it exposes, what it shares, and which entry chunks boot
//! its container:
//!
//! ```json
//! {
//!   "name": "providerA",
//!   "remoteEntry": ["static/js/remoteEntry.js"],
//!   "exposes": { "./app": ["static/js/app.js"] },
//!   "shared": [
//!     { "library": "react", "version": "18.3.1", "singleton": true, "eager": true }
//!   ]
//! }
//! ```
//!
//! [`ManifestResolver`] caches parsed manifests by exact URL and coalesces
//! concurrent fetches for the same URL. Failed fetches are never cached:
//! manifests are small and transient failures (a cold CDN edge) are expected,
//! so the next call simply retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::FederationError;
use crate::fetch::ManifestFetcher;
use crate::flight::SingleFlight;
use crate::shared::SharedDependencySpec;

// ─── Data model ──────────────────────────────────────────────────────────────

/// Reference to one script chunk, relative to the remote's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkRef(pub String);

impl ChunkRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One successfully parsed manifest. Produced once per fetch, then cached.
#[derive(Debug, Clone)]
pub struct RemoteManifest {
    /// The remote's self-declared name.
    pub remote_name: String,
    /// Exposed key → chunks needed to load that module.
    pub exposed_modules: HashMap<String, Vec<ChunkRef>>,
    /// Shared-library declarations, reconciled before the container runs.
    pub shared_dependencies: Vec<SharedDependencySpec>,
    /// Entry chunk(s) that register the container itself.
    pub container_entry_refs: Vec<ChunkRef>,
}

/// On-wire shape. Kept separate from [`RemoteManifest`] so structural
/// validation happens in exactly one place.
#[derive(Deserialize)]
struct RawManifest {
    name: String,
    #[serde(rename = "remoteEntry")]
    remote_entry: Vec<ChunkRef>,
    #[serde(default)]
    exposes: HashMap<String, Vec<ChunkRef>>,
    #[serde(default)]
    shared: Vec<SharedDependencySpec>,
}

impl RemoteManifest {
    /// Parse and validate a manifest document fetched from `url`.
    pub fn parse(url: &str, body: &str) -> Result<Self, FederationError> {
        let raw: RawManifest =
            serde_json::from_str(body).map_err(|e| FederationError::ManifestParse {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if raw.name.is_empty() {
            return Err(FederationError::ManifestParse {
                url: url.to_string(),
                reason: "manifest 'name' is empty".into(),
            });
        }
        if raw.remote_entry.is_empty() {
            return Err(FederationError::ManifestParse {
                url: url.to_string(),
                reason: "manifest 'remoteEntry' lists no chunks".into(),
            });
        }

        Ok(Self {
            remote_name: raw.name,
            exposed_modules: raw.exposes,
            shared_dependencies: raw.shared,
            container_entry_refs: raw.remote_entry,
        })
    }

    /// Whether the manifest exposes `key`.
    pub fn exposes(&self, key: &str) -> bool {
        self.exposed_modules.contains_key(key)
    }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Fetches, parses, and caches manifests keyed by exact URL string.
pub struct ManifestResolver {
    fetcher: Arc<dyn ManifestFetcher>,
    cache: Arc<Mutex<HashMap<String, Arc<RemoteManifest>>>>,
    flights: SingleFlight<String, Arc<RemoteManifest>>,
}

impl ManifestResolver {
    pub fn new(fetcher: Arc<dyn ManifestFetcher>) -> Self {
        Self {
            fetcher,
            cache: Arc::new(Mutex::new(HashMap::new())),
            flights: SingleFlight::new(),
        }
    }

    /// Resolve the manifest at `url`, fetching at most once no matter how
    /// many callers arrive while the fetch is pending.
    pub async fn resolve(&self, url: &str) -> Result<Arc<RemoteManifest>, FederationError> {
        if let Some(cached) = self.cache.lock().expect("manifest cache poisoned").get(url) {
            return Ok(Arc::clone(cached));
        }

        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let owned_url = url.to_string();
        self.flights
            .run(owned_url.clone(), move || async move {
                let body = fetcher.fetch(&owned_url).await.map_err(|e| {
                    FederationError::ManifestFetch {
                        url: owned_url.clone(),
                        reason: format!("{e:#}"),
                    }
                })?;
                let manifest = Arc::new(RemoteManifest::parse(&owned_url, &body)?);
                tracing::debug!(
                    url = %owned_url,
                    remote = %manifest.remote_name,
                    exposed = manifest.exposed_modules.len(),
                    "manifest resolved"
                );
                cache
                    .lock()
                    .expect("manifest cache poisoned")
                    .insert(owned_url, Arc::clone(&manifest));
                Ok(manifest)
            })
            .await
    }

    /// Drop the cached manifest for `url`. Called when a remote is
    /// re-registered at a new location.
    pub fn invalidate(&self, url: &str) -> bool {
        self.cache
            .lock()
            .expect("manifest cache poisoned")
            .remove(url)
            .is_some()
    }
}
