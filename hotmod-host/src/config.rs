//! Manager configuration

use crate::HostError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Platform suffix of loadable modules (`.so`, `.dylib` or `.dll`)
pub const DEFAULT_SUFFIX: &str = std::env::consts::DLL_SUFFIX;

/// Default quiet period before a lifecycle request is acted on
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Configuration for a [`Manager`](crate::Manager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory scanned at start and watched afterwards
    pub root: PathBuf,

    /// Only file names ending with this suffix are modules
    pub suffix: String,

    /// Debounce window in milliseconds
    pub debounce_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            suffix: DEFAULT_SUFFIX.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl ManagerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| HostError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| HostError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check if `path` names a module file
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&self.suffix))
    }
}
