//! Core identifiers and states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identifier of a shared worker, typically the path of its entry file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&Path> for ResourceKey {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

/// Readiness of a shared worker as seen by the host
///
/// Transitions only move forward: `Pending` to `Available` or `Errored`,
/// and from any state to `Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Pending,
    Available,
    Errored,
    Exited,
}

impl ReadyState {
    /// Whether the worker can no longer become available
    pub fn is_settled(&self) -> bool {
        !matches!(self, ReadyState::Pending)
    }
}
