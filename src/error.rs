// SPDX-License-Identifier: MIT
//! Error taxonomy for the federation runtime.
//!
//! Every failure that can reach a `get_module` caller is a variant here, so
//! the composing application can match on the cause instead of string-parsing.
//! Variants carry owned strings rather than source errors because results are
//! fanned out to every coalesced waiter (the error must be `Clone`).

/// A typed failure surfaced by the federation runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FederationError {
    /// No descriptor is registered under this remote name.
    #[error("remote '{0}' is not registered")]
    RemoteNotRegistered(String),

    /// The manifest document could not be fetched (network failure, 404).
    #[error("failed to fetch manifest from {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    /// The manifest document was fetched but is not a well-formed manifest.
    #[error("invalid manifest at {url}: {reason}")]
    ManifestParse { url: String, reason: String },

    /// The remote's entry script(s) could not be fetched or evaluated.
    #[error("failed to load container for remote '{remote}': {reason}")]
    ContainerFetch { remote: String, reason: String },

    /// The entry script loaded but did not yield a working container, or the
    /// container's `init` call failed.
    #[error("container init failed for remote '{remote}': {reason}")]
    ContainerInit { remote: String, reason: String },

    /// The requested exposed key is absent from the remote's manifest.
    #[error("remote '{remote}' does not expose module '{key}'")]
    ExposedModuleNotFound { remote: String, key: String },

    /// Two singleton claims for the same library have incompatible version
    /// ranges. This is a host configuration error, not a runtime condition.
    #[error(
        "shared dependency conflict for '{library}': \
         scope holds {established}, remote '{remote}' requires {requirement}"
    )]
    SharedDependencyConflict {
        library: String,
        established: String,
        requirement: String,
        remote: String,
    },
}

impl FederationError {
    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Network-class failures are retryable because failed fetches are never
    /// cached. Configuration errors (`ExposedModuleNotFound`,
    /// `SharedDependencyConflict`) are not: retrying cannot change the
    /// outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FederationError::ManifestFetch { .. } | FederationError::ContainerFetch { .. }
        )
    }
}
