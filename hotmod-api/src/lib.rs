//! hotmod-api: Shared types for the hotmod module system
//!
//! This crate defines the protocol between the host and compiled modules:
//! the dynamically typed [`Value`] model, per-function [`Signature`]s, the
//! error values returned through result vectors, and the C ABI used to
//! exchange MessagePack payloads.

pub mod abi;
mod convert;
mod error;
mod value;

use serde::{Deserialize, Serialize};

pub use convert::{Exportable, FromValue, FunctionExport, IntoValue, IntoValues};
pub use error::{CallError, ErrorKind};
pub use value::{Signature, Value, ValueType};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Identity reported by a module's entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// API version the module was built against
    pub api_version: u32,

    /// Logical module name used for resolution
    pub name: String,

    /// Version used as the registry ordering key
    pub version: u64,
}

impl ModuleManifest {
    /// Create a manifest for the current API version
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            api_version: API_VERSION,
            name: name.into(),
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_serialization() {
        let manifest = ModuleManifest::new("testplugin", 0x0001_0000);
        let bytes = abi::encode(&manifest).unwrap();
        let decoded: ModuleManifest = abi::decode(&bytes).unwrap();

        assert_eq!(decoded.name, "testplugin");
        assert_eq!(decoded.version, 0x0001_0000);
        assert_eq!(decoded.api_version, API_VERSION);
    }
}
