// SPDX-License-Identifier: MIT
//! Routing bridge boundary.
//!
//! The host hands a mounted remote a base path prefix; the remote owns every
//! sub-path beneath it and does its own navigation. That handshake (prefix
//! in, nothing else) is the whole contract. Which router the host uses is out
//! of scope.

/// The base-path handshake for one mounted remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub remote: String,
    base_path: String,
}

impl MountPoint {
    /// `base_path` is normalized to a leading slash and no trailing slash, so
    /// `"provider-a"`, `"/provider-a"`, and `"/provider-a/"` are equivalent.
    pub fn new(remote: impl Into<String>, base_path: &str) -> Self {
        let trimmed = base_path.trim_matches('/');
        Self {
            remote: remote.into(),
            base_path: format!("/{trimmed}"),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether `path` falls under this mount.
    pub fn contains(&self, path: &str) -> bool {
        // A root mount owns the whole path space.
        if self.base_path == "/" {
            return path.starts_with('/');
        }
        path == self.base_path
            || path
                .strip_prefix(self.base_path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The remote-owned sub-path for `path`, rooted at `/`.
    pub fn sub_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_path == "/" {
            return path.starts_with('/').then_some(path);
        }
        if path == self.base_path {
            return Some("/");
        }
        path.strip_prefix(self.base_path.as_str())
            .filter(|rest| rest.starts_with('/'))
    }
}
