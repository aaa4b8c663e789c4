//! Host-side error type

use hotmod_api::{CallError, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the module lifecycle engine and the call surface
#[derive(Debug, Error)]
pub enum HostError {
    /// The artifact could not be opened
    #[error("Failed to open artifact {}: {reason}", .path.display())]
    OpenFailure { path: PathBuf, reason: String },

    /// A required or requested export is missing
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Another module already holds this name and version
    #[error("Module {name} version 0x{version:x} is already loaded")]
    IdentityConflict { name: String, version: u64 },

    /// The entry point reported an error of its own
    #[error("Entry point of {} refused to load: {reason}", .path.display())]
    EntryFailed { path: PathBuf, reason: String },

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: u32 },

    /// A payload returned by the module could not be decoded
    #[error("Malformed payload from {symbol}: {reason}")]
    Codec { symbol: String, reason: String },

    /// A reload or unload hook failed
    #[error("{hook} hook failed: {message}")]
    Hook { hook: &'static str, message: String },

    /// No module registered under the requested name or version
    #[error("Module not found: {name}{}", .version.map(|v| format!(" version 0x{:x}", v)).unwrap_or_default())]
    NotFound { name: String, version: Option<u64> },

    /// The module has no open handle
    #[error("Module is not loaded: {}", .path.display())]
    NotLoaded { path: PathBuf },

    #[error("Manager is not running")]
    NotRunning,

    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch directory: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Dispatch(#[from] CallError),
}

impl HostError {
    /// Create an open failure error
    pub fn open_failure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OpenFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Boundary classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenFailure { .. } | Self::Io { .. } => ErrorKind::OpenFailure,
            Self::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            Self::IdentityConflict { .. } => ErrorKind::IdentityConflict,
            Self::NotFound { .. } | Self::NotLoaded { .. } => ErrorKind::NotFound,
            Self::NotRunning => ErrorKind::NotRunning,
            Self::EntryFailed { .. } | Self::Hook { .. } => ErrorKind::Module,
            Self::ApiVersionMismatch { .. }
            | Self::Codec { .. }
            | Self::Watch(_)
            | Self::Config(_) => ErrorKind::Internal,
            Self::Dispatch(e) => e.kind,
        }
    }

    /// The value placed in the final slot of a failed call's result vector
    pub fn into_call_error(self) -> CallError {
        match self {
            Self::Dispatch(e) => e,
            other => CallError::new(other.kind(), other.to_string()),
        }
    }
}
