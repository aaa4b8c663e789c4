//! Dynamic call adapter
//!
//! Wraps an exported function behind a uniform "values in, values out"
//! surface. Arguments are checked against the declared signature before the
//! function runs, and every failure comes back as a result vector of the
//! declared width with the error in the final slot.

use crate::artifact::ExportedFunction;
use crate::HostError;
use hotmod_api::{CallError, Signature, Value};
use std::fmt;
use std::sync::Arc;

/// A resolved function of one loaded module
///
/// Adapters are cached per module and load generation; one obtained before
/// a module was unloaded keeps its library mapped but is no longer handed
/// out.
pub struct CallAdapter {
    module: String,
    function: String,
    generation: u64,
    target: Arc<dyn ExportedFunction>,
}

impl CallAdapter {
    pub(crate) fn new(
        module: impl Into<String>,
        function: impl Into<String>,
        generation: u64,
        target: Arc<dyn ExportedFunction>,
    ) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            generation,
            target,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Load generation of the module this adapter was resolved from
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signature(&self) -> &Signature {
        self.target.signature()
    }

    /// Validate arguments without calling
    pub fn check(&self, args: &[Value]) -> Result<(), CallError> {
        self.signature()
            .check(args)
            .map_err(|e| e.in_function(&self.function))
    }

    /// Call the function, keeping failures out of the result vector
    ///
    /// A rejected call never reaches the module.
    pub fn try_invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, HostError> {
        if let Err(e) = self.check(&args) {
            tracing::warn!(
                module = %self.module,
                function = %self.function,
                error = %e,
                "Rejected call"
            );
            return Err(e.into());
        }

        self.target.call(args).map_err(|e| {
            let e = e.in_function(&self.function);
            tracing::warn!(
                module = %self.module,
                function = %self.function,
                error = %e,
                "Call failed"
            );
            HostError::Dispatch(e)
        })
    }

    /// Call the function
    ///
    /// Returns the function's own results on success. On failure the vector
    /// holds `Nil` padding followed by the error.
    pub fn invoke(&self, args: Vec<Value>) -> Vec<Value> {
        self.try_invoke(args)
            .unwrap_or_else(|e| self.signature().failure(e.into_call_error()))
    }
}

impl fmt::Debug for CallAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAdapter")
            .field("module", &self.module)
            .field("function", &self.function)
            .field("generation", &self.generation)
            .field("signature", self.signature())
            .finish()
    }
}
