//! hotmod-sdk: SDK for writing hotmod modules
//!
//! This SDK generates the C exports a hotmod host looks up, so a module is
//! a plain `cdylib` of ordinarily typed functions.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hotmod_sdk::prelude::*;
//!
//! fn on_unload() -> Result<(), String> {
//!     Ok(())
//! }
//!
//! #[export]
//! fn greet(name: String) -> String {
//!     format!("hello {}", name)
//! }
//!
//! // Entry point, buffer release and the optional hooks
//! export_module!(name: "greeter", version: 0x0001_0000, unload: on_unload);
//! ```

// Re-export everything from hotmod-api
pub use hotmod_api::*;
pub use hotmod_macros::export;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{export, export_module};
    pub use hotmod_api::{
        CallError, ErrorKind, FromValue, IntoValue, IntoValues, Value, ValueType, API_VERSION,
    };
}

/// Buffer helpers for the module side of the boundary
pub mod memory {
    use hotmod_api::abi::{self, RawBuffer};
    use serde::de::DeserializeOwned;
    use serde::Serialize;

    /// Serialize a payload and hand ownership of the bytes to the host
    ///
    /// The host returns the buffer through `hotmod_free`.
    pub fn serialize_and_return<T: Serialize>(data: &T) -> RawBuffer {
        RawBuffer::from_vec(abi::encode(data).unwrap_or_default())
    }

    /// Deserialize a payload the host lent to the module
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes for the duration of the call.
    pub unsafe fn deserialize_from_ptr<T: DeserializeOwned>(
        ptr: *const u8,
        len: usize,
    ) -> Result<T, rmp_serde::decode::Error> {
        let bytes = if ptr.is_null() || len == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(ptr, len) }
        };
        abi::decode(bytes)
    }

    /// Release a buffer previously returned to the host
    ///
    /// # Safety
    /// The buffer must come from [`serialize_and_return`] and be released once.
    pub unsafe fn free(buffer: RawBuffer) {
        drop(unsafe { buffer.into_vec() });
    }
}

/// Support code for the generated exports. Not a stable API.
#[doc(hidden)]
pub mod __private {
    use crate::memory;
    use hotmod_api::abi::{CallReport, EntryReport, HookReport, RawBuffer};
    use hotmod_api::{CallError, Exportable, ModuleManifest, Value};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    pub use crate::memory::free;

    pub type Hook = fn() -> Result<(), String>;

    fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
        if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        }
    }

    fn run_hook(hook: Hook) -> HookReport {
        match catch_unwind(hook) {
            Ok(report) => report,
            Err(payload) => Err(format!("hook panicked: {}", panic_message(payload))),
        }
    }

    pub fn entry(name: &str, version: u64, load: Option<Hook>) -> RawBuffer {
        let report: EntryReport = match load.map(run_hook) {
            Some(Err(e)) => Err(e),
            _ => Ok(ModuleManifest::new(name, version)),
        };
        memory::serialize_and_return(&report)
    }

    pub fn hook(hook: Hook) -> RawBuffer {
        memory::serialize_and_return(&run_hook(hook))
    }

    pub fn signature<F, Args>(f: F) -> RawBuffer
    where
        F: Exportable<Args>,
    {
        memory::serialize_and_return(&f.signature())
    }

    /// # Safety
    /// `args_ptr` must point to `args_len` readable bytes.
    pub unsafe fn invoke<F, Args>(f: F, args_ptr: *const u8, args_len: usize) -> RawBuffer
    where
        F: Exportable<Args>,
    {
        let args: Result<Vec<Value>, _> =
            unsafe { memory::deserialize_from_ptr(args_ptr, args_len) };
        let report: CallReport = match args {
            Ok(args) => match catch_unwind(AssertUnwindSafe(|| f.invoke(args))) {
                Ok(report) => report,
                Err(payload) => Err(CallError::internal(format!(
                    "module panicked: {}",
                    panic_message(payload)
                ))),
            },
            Err(e) => Err(CallError::internal(format!(
                "failed to decode arguments: {}",
                e
            ))),
        };
        memory::serialize_and_return(&report)
    }
}

/// Macro to export the module entry point and lifecycle hooks
///
/// Generates `hotmod_entry` and `hotmod_free`, plus `hotmod_reload` and
/// `hotmod_unload` when the matching hook is given. Hooks are
/// `fn() -> Result<(), String>` and must appear in the order shown. A
/// failing `load` hook makes the host reject the module.
///
/// # Example
///
/// ```rust,ignore
/// export_module!(
///     name: "testplugin",
///     version: 0x0001_0000,
///     load: on_load,
///     reload: on_reload,
///     unload: on_unload,
/// );
/// ```
#[macro_export]
macro_rules! export_module {
    (
        name: $name:expr,
        version: $version:expr
        $(, load: $load:path)?
        $(, reload: $reload:path)?
        $(, unload: $unload:path)?
        $(,)?
    ) => {
        #[no_mangle]
        pub extern "C" fn hotmod_entry() -> $crate::abi::RawBuffer {
            let load: ::std::option::Option<$crate::__private::Hook> = ::std::option::Option::None
                $(.or(::std::option::Option::Some($load as $crate::__private::Hook)))?;
            $crate::__private::entry($name, $version, load)
        }

        #[no_mangle]
        pub unsafe extern "C" fn hotmod_free(buffer: $crate::abi::RawBuffer) {
            unsafe { $crate::__private::free(buffer) }
        }

        $(
            #[no_mangle]
            pub extern "C" fn hotmod_reload() -> $crate::abi::RawBuffer {
                $crate::__private::hook($reload)
            }
        )?

        $(
            #[no_mangle]
            pub extern "C" fn hotmod_unload() -> $crate::abi::RawBuffer {
                $crate::__private::hook($unload)
            }
        )?
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_api::abi::{self, CallReport, EntryReport, HookReport};

    fn greet(name: String) -> String {
        format!("hello {}", name)
    }

    fn failing_load() -> Result<(), String> {
        Err("config missing".to_string())
    }

    fn read_buffer<T: serde::de::DeserializeOwned>(buffer: abi::RawBuffer) -> T {
        let bytes = unsafe { buffer.into_vec() };
        abi::decode(&bytes).unwrap()
    }

    #[test]
    fn test_entry_reports_manifest() {
        let report: EntryReport = read_buffer(__private::entry("greeter", 7, None));
        let manifest = report.unwrap();
        assert_eq!(manifest.name, "greeter");
        assert_eq!(manifest.version, 7);
    }

    #[test]
    fn test_entry_propagates_load_failure() {
        let report: EntryReport =
            read_buffer(__private::entry("greeter", 7, Some(failing_load)));
        assert_eq!(report.unwrap_err(), "config missing");
    }

    #[test]
    fn test_hook_catches_panic() {
        let report: HookReport = read_buffer(__private::hook(|| panic!("boom")));
        assert!(report.unwrap_err().contains("boom"));
    }

    #[test]
    fn test_invoke_round_trip() {
        let args = abi::encode(&vec![Value::Str("world".into())]).unwrap();
        let buffer =
            unsafe { __private::invoke(greet as fn(String) -> String, args.as_ptr(), args.len()) };
        let report: CallReport = read_buffer(buffer);
        assert_eq!(report.unwrap(), vec![Value::Str("hello world".into())]);
    }

    #[test]
    fn test_invoke_rejects_garbage_arguments() {
        let garbage = [0xc1u8];
        let buffer = unsafe {
            __private::invoke(greet as fn(String) -> String, garbage.as_ptr(), garbage.len())
        };
        let report: CallReport = read_buffer(buffer);
        assert_eq!(report.unwrap_err().kind, ErrorKind::Internal);
    }
}
