//! hotmod-host: Hot-reloading module host
//!
//! Watches a directory of compiled modules, keeps each one's lifecycle in
//! step with the filesystem, indexes loaded modules by name and version, and
//! dispatches dynamically typed calls into them.
//!
//! ```rust,ignore
//! use hotmod_host::{Manager, ManagerConfig, Value};
//!
//! let manager = Manager::new(ManagerConfig::new("/srv/modules"));
//! manager.start().await?;
//!
//! let result = manager.call("testplugin", "test", vec![Value::Str("world".into())]);
//! assert_eq!(result, vec![Value::Str("hello world".into())]);
//! ```

pub mod artifact;
pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod module;
pub mod registry;
pub mod watcher;

pub use artifact::{Artifact, ArtifactLoader, ExportedFunction};
pub use builtin::{BuiltinLoader, BuiltinModule};
pub use config::ManagerConfig;
pub use dispatch::CallAdapter;
pub use error::HostError;
pub use lifecycle::{LifecycleEvent, LifecycleObserver, NoopObserver};
pub use loader::NativeLoader;
pub use manager::{Manager, ManagerBuilder};
pub use module::{Module, ModuleHandle, ModuleIdentity, ModuleState, Request};
pub use registry::Registry;
pub use watcher::WatchOp;

pub use hotmod_api::{CallError, ErrorKind, Signature, Value, ValueType};
