//! Native module loader
//!
//! Opens compiled modules with `libloading` and talks to them through the
//! C ABI in [`hotmod_api::abi`]. Every buffer a module returns is copied and
//! handed back to the module's own `hotmod_free` before it is decoded.

use crate::artifact::{Artifact, ArtifactLoader, ExportedFunction};
use crate::HostError;
use hotmod_api::abi::{
    self, CallFn, CallReport, EntryFn, EntryReport, FreeFn, HookFn, HookReport, RawBuffer,
    SignatureFn, ENTRY_SYMBOL, FREE_SYMBOL, RELOAD_SYMBOL, UNLOAD_SYMBOL,
};
use hotmod_api::{CallError, ModuleManifest, Signature, Value};
use libloading::Library;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loader for native shared libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Artifact>, HostError> {
        // SAFETY: loading a library runs its initializers; modules in the
        // watched directory are trusted by whoever configured the host.
        let library = unsafe { Library::new(path) }
            .map_err(|e| HostError::open_failure(path, e.to_string()))?;

        let free = unsafe { library.get::<FreeFn>(FREE_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| HostError::SymbolNotFound(format!("{}: {}", FREE_SYMBOL, e)))?;

        tracing::debug!(path = %path.display(), "Opened native library");

        Ok(Box::new(NativeArtifact {
            library: Arc::new(NativeLibrary {
                path: path.to_path_buf(),
                library,
                free,
            }),
        }))
    }
}

/// An open library shared by the artifact and every function looked up from it
struct NativeLibrary {
    path: PathBuf,
    library: Library,
    free: FreeFn,
}

impl NativeLibrary {
    fn symbol<T: Copy>(&self, name: &str) -> Result<T, HostError> {
        unsafe { self.library.get::<T>(name.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| HostError::SymbolNotFound(format!("{}: {}", name, e)))
    }

    fn optional_symbol<T: Copy>(&self, name: &str) -> Option<T> {
        unsafe { self.library.get::<T>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }

    /// Copy a returned buffer out and release it through the module allocator
    fn take(&self, buffer: RawBuffer) -> Vec<u8> {
        let bytes = unsafe { buffer.as_slice() }.to_vec();
        unsafe { (self.free)(buffer) };
        bytes
    }

    fn decode<T: DeserializeOwned>(&self, symbol: &str, buffer: RawBuffer) -> Result<T, HostError> {
        let bytes = self.take(buffer);
        abi::decode(&bytes).map_err(|e| HostError::Codec {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })
    }

    fn run_hook(&self, symbol: &str, hook: &'static str) -> Option<Result<(), HostError>> {
        let hook_fn = self.optional_symbol::<HookFn>(symbol)?;
        let outcome = self
            .decode::<HookReport>(symbol, unsafe { hook_fn() })
            .and_then(|report| report.map_err(|message| HostError::Hook { hook, message }));
        Some(outcome)
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "Closing native library");
    }
}

struct NativeArtifact {
    library: Arc<NativeLibrary>,
}

impl Artifact for NativeArtifact {
    fn entry(&self) -> Result<ModuleManifest, HostError> {
        let entry: EntryFn = self.library.symbol(ENTRY_SYMBOL)?;
        let report: EntryReport = self.library.decode(ENTRY_SYMBOL, unsafe { entry() })?;
        report.map_err(|reason| HostError::EntryFailed {
            path: self.library.path.clone(),
            reason,
        })
    }

    fn reload(&self) -> Option<Result<(), HostError>> {
        self.library.run_hook(RELOAD_SYMBOL, "reload")
    }

    fn unload(&self) -> Option<Result<(), HostError>> {
        self.library.run_hook(UNLOAD_SYMBOL, "unload")
    }

    fn lookup(&self, function: &str) -> Result<Arc<dyn ExportedFunction>, HostError> {
        let signature_symbol = abi::signature_symbol(function);
        let call_symbol = abi::function_symbol(function);

        let signature_fn: SignatureFn = self.library.symbol(&signature_symbol)?;
        let call: CallFn = self.library.symbol(&call_symbol)?;
        let signature: Signature = self
            .library
            .decode(&signature_symbol, unsafe { signature_fn() })?;

        Ok(Arc::new(NativeFunction {
            symbol: call_symbol,
            signature,
            call,
            library: Arc::clone(&self.library),
        }))
    }
}

/// A function export; keeps its library mapped while referenced
struct NativeFunction {
    symbol: String,
    signature: Signature,
    call: CallFn,
    library: Arc<NativeLibrary>,
}

impl ExportedFunction for NativeFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
        let payload = abi::encode(&args)
            .map_err(|e| CallError::internal(format!("failed to encode arguments: {}", e)))?;
        let buffer = unsafe { (self.call)(payload.as_ptr(), payload.len()) };
        let report: CallReport = self
            .library
            .decode(&self.symbol, buffer)
            .map_err(|e| CallError::internal(e.to_string()))?;
        report
    }
}
