// SPDX-License-Identifier: MIT
//! Host configuration.
//!
//! Loaded from a TOML file when present, otherwise defaults. Remotes may be
//! declared in the file so deployment can rebind a remote's manifest URL
//! without a host rebuild:
//!
//! ```toml
//! fetch_timeout_secs = 10
//!
//! [[remotes]]
//! name = "providerA"
//! manifest_url = "http://localhost:3001/mf-manifest.json"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::RemoteDescriptor;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Host-wide settings for the federation runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Timeout for manifest fetches, in seconds.
    ///
    /// This bounds a single HTTP request only. A timed-out caller never
    /// poisons shared caches: failed fetches are simply not cached, so
    /// callers willing to wait longer retry cleanly.
    pub fetch_timeout_secs: u64,

    /// Remotes registered at startup, before any `register_remotes` call.
    pub remotes: Vec<RemoteDescriptor>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            remotes: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load from a TOML file. A missing file yields the defaults; a present
    /// but malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            remotes = config.remotes.len(),
            "config loaded"
        );
        Ok(config)
    }
}
