//! Errors carried as data across the call boundary

use crate::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failure reported in a result vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Artifact could not be opened
    OpenFailure,
    /// Required or requested export is missing
    SymbolNotFound,
    /// Name and version already registered by another module
    IdentityConflict,
    ArityMismatch,
    TypeMismatch,
    /// No module registered under the requested name or version
    NotFound,
    /// Call made before the manager started
    NotRunning,
    /// Error returned by module code
    Module,
    /// Codec failure or panic caught at the boundary
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::OpenFailure => "OpenFailure",
            ErrorKind::SymbolNotFound => "SymbolNotFound",
            ErrorKind::IdentityConflict => "IdentityConflict",
            ErrorKind::ArityMismatch => "ArityMismatch",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NotRunning => "NotRunning",
            ErrorKind::Module => "Module",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Error value placed in the final slot of a failed call's result vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrong number of arguments
    pub fn arity(expected: usize, actual: usize) -> Self {
        Self::new(
            ErrorKind::ArityMismatch,
            format!("expected {} arguments, got {}", expected, actual),
        )
    }

    /// Argument at `position` has the wrong dynamic type
    pub fn type_mismatch(position: usize, expected: ValueType, actual: ValueType) -> Self {
        Self::new(
            ErrorKind::TypeMismatch,
            format!(
                "params[{}] requires type {}, got {}",
                position, expected, actual
            ),
        )
    }

    /// Error raised by module code
    pub fn module(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Module, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Prefix the message with the function it concerns
    pub fn in_function(mut self, function: &str) -> Self {
        self.message = format!("failed to call [{}], {}", function, self.message);
        self
    }
}
