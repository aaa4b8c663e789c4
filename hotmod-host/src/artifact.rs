//! Artifact abstraction
//!
//! An artifact is an opened module image. The lifecycle engine only talks to
//! these traits, so native libraries and in-process modules go through the
//! same load, reload, unload and lookup paths.

use crate::HostError;
use hotmod_api::{CallError, FunctionExport, ModuleManifest, Signature, Value};
use std::path::Path;
use std::sync::Arc;

/// A callable export of an opened artifact
pub trait ExportedFunction: Send + Sync {
    /// Declared parameter and return types
    fn signature(&self) -> &Signature;

    /// Call the export with already validated arguments
    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError>;
}

impl ExportedFunction for FunctionExport {
    fn signature(&self) -> &Signature {
        FunctionExport::signature(self)
    }

    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
        self.invoke(args)
    }
}

/// An opened module image
///
/// Dropping the artifact releases the underlying handle.
pub trait Artifact: Send + Sync {
    /// Run the entry point and report the module identity
    fn entry(&self) -> Result<ModuleManifest, HostError>;

    /// Run the reload hook, `None` when the module exports none
    fn reload(&self) -> Option<Result<(), HostError>>;

    /// Run the unload hook, `None` when the module exports none
    fn unload(&self) -> Option<Result<(), HostError>>;

    /// Look up an exported function by name
    fn lookup(&self, function: &str) -> Result<Arc<dyn ExportedFunction>, HostError>;
}

/// Opens artifacts from files
pub trait ArtifactLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Artifact>, HostError>;
}
