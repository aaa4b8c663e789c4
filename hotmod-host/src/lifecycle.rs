//! Lifecycle notifications
//!
//! Integrators observe module transitions either synchronously through a
//! [`LifecycleObserver`] (called on the module's worker) or asynchronously
//! through the [`LifecycleEvent`] broadcast returned by
//! [`Manager::subscribe`](crate::Manager::subscribe).

use crate::module::{ModuleHandle, ModuleIdentity};
use crate::HostError;
use hotmod_api::ErrorKind;
use std::path::{Path, PathBuf};

/// Synchronous lifecycle callbacks; every method defaults to a no-op
///
/// Callbacks run on the module's worker task, so they should return quickly.
pub trait LifecycleObserver: Send + Sync {
    fn on_loaded(&self, _module: &ModuleHandle) {}

    fn on_reloaded(&self, _module: &ModuleHandle) {}

    fn on_unloaded(&self, _module: &ModuleHandle) {}

    /// A load, reload hook or unload hook failed
    fn on_error(&self, _module: &ModuleHandle, _error: &HostError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// A completed transition or a lifecycle failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Loaded {
        path: PathBuf,
        identity: ModuleIdentity,
    },
    Reloaded {
        path: PathBuf,
        identity: Option<ModuleIdentity>,
    },
    Unloaded {
        path: PathBuf,
        identity: Option<ModuleIdentity>,
    },
    Failed {
        path: PathBuf,
        kind: ErrorKind,
        message: String,
    },
}

impl LifecycleEvent {
    /// Artifact path the event is about
    pub fn path(&self) -> &Path {
        match self {
            Self::Loaded { path, .. }
            | Self::Reloaded { path, .. }
            | Self::Unloaded { path, .. }
            | Self::Failed { path, .. } => path,
        }
    }

    pub(crate) fn failed(module: &ModuleHandle, error: &HostError) -> Self {
        Self::Failed {
            path: module.path().to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let describe = |identity: &Option<ModuleIdentity>| {
            identity
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "<unknown>".to_string())
        };
        match self {
            Self::Loaded { path, identity } => {
                write!(f, "loaded {} from {}", identity, path.display())
            }
            Self::Reloaded { path, identity } => {
                write!(f, "reloaded {} from {}", describe(identity), path.display())
            }
            Self::Unloaded { path, identity } => {
                write!(f, "unloaded {} from {}", describe(identity), path.display())
            }
            Self::Failed {
                path,
                kind,
                message,
            } => write!(f, "failed {} ({}): {}", path.display(), kind, message),
        }
    }
}
