//! C ABI shared by the host and compiled modules
//!
//! Every payload crossing the boundary is MessagePack. Buffers returned by a
//! module are owned by the module's allocator and must be handed back through
//! its [`FREE_SYMBOL`] export once the host has copied them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{CallError, ModuleManifest, Value};

/// `fn() -> RawBuffer` encoding [`EntryReport`] (required)
pub const ENTRY_SYMBOL: &str = "hotmod_entry";

/// `fn(RawBuffer)` releasing a buffer returned by the module (required)
pub const FREE_SYMBOL: &str = "hotmod_free";

/// `fn() -> RawBuffer` encoding [`HookReport`] (optional)
pub const RELOAD_SYMBOL: &str = "hotmod_reload";

/// `fn() -> RawBuffer` encoding [`HookReport`] (optional)
pub const UNLOAD_SYMBOL: &str = "hotmod_unload";

/// Prefix of `fn(*const u8, usize) -> RawBuffer` function exports
pub const FUNCTION_PREFIX: &str = "hotmod_fn_";

/// Prefix of `fn() -> RawBuffer` signature exports
pub const SIGNATURE_PREFIX: &str = "hotmod_sig_";

pub type EntryFn = unsafe extern "C" fn() -> RawBuffer;
pub type HookFn = unsafe extern "C" fn() -> RawBuffer;
pub type SignatureFn = unsafe extern "C" fn() -> RawBuffer;
pub type CallFn = unsafe extern "C" fn(args_ptr: *const u8, args_len: usize) -> RawBuffer;
pub type FreeFn = unsafe extern "C" fn(buffer: RawBuffer);

/// What the entry point reports: the module identity or why it refused to load
pub type EntryReport = Result<ModuleManifest, String>;

/// Outcome of a reload or unload hook
pub type HookReport = Result<(), String>;

/// Outcome of an exported function call
pub type CallReport = Result<Vec<Value>, CallError>;

/// Symbol name of the exported function `name`
pub fn function_symbol(name: &str) -> String {
    format!("{}{}", FUNCTION_PREFIX, name)
}

/// Symbol name of the signature export for `name`
pub fn signature_symbol(name: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, name)
}

/// A byte buffer allocated on one side of the boundary
#[repr(C)]
#[derive(Debug)]
pub struct RawBuffer {
    pub ptr: *mut u8,
    pub len: usize,
    pub cap: usize,
}

impl RawBuffer {
    /// Leak a vector into a buffer; reclaim it with [`RawBuffer::into_vec`]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let mut bytes = std::mem::ManuallyDrop::new(bytes);
        Self {
            ptr: bytes.as_mut_ptr(),
            len: bytes.len(),
            cap: bytes.capacity(),
        }
    }

    /// View the buffer contents
    ///
    /// # Safety
    /// `ptr` must point to `len` initialized bytes that outlive the borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Reclaim a buffer created by [`RawBuffer::from_vec`]
    ///
    /// # Safety
    /// Must be called by the same allocator that produced the buffer, once.
    pub unsafe fn into_vec(self) -> Vec<u8> {
        if self.ptr.is_null() {
            return Vec::new();
        }
        unsafe { Vec::from_raw_parts(self.ptr, self.len, self.cap) }
    }
}

/// Encode a payload for the boundary
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(value)
}

/// Decode a payload received from the boundary
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}
