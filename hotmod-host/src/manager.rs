//! Module manager
//!
//! Owns the path cache, the registry and the watch loop, and exposes the
//! call surface. Modules report their transitions back to the manager,
//! which keeps the registry in step and fans the transitions out to the
//! observer and to event subscribers.

use crate::artifact::ArtifactLoader;
use crate::dispatch::CallAdapter;
use crate::lifecycle::{LifecycleEvent, LifecycleObserver, NoopObserver};
use crate::loader::NativeLoader;
use crate::module::{Module, ModuleHandle, ModuleIdentity, Transitions};
use crate::registry::Registry;
use crate::watcher::{self, WatchLoop, WatchOp};
use crate::{HostError, ManagerConfig};
use hotmod_api::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 256;

/// Builder for [`Manager`]
pub struct ManagerBuilder {
    config: ManagerConfig,
    loader: Option<Arc<dyn ArtifactLoader>>,
    observer: Option<Arc<dyn LifecycleObserver>>,
}

impl ManagerBuilder {
    /// Open artifacts with `loader` instead of [`NativeLoader`]
    pub fn loader(mut self, loader: impl ArtifactLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Manager {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Manager {
            shared: Arc::new(Shared {
                config: self.config,
                loader: self.loader.unwrap_or_else(|| Arc::new(NativeLoader::new())),
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
                registry: Registry::new(),
                modules: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                events,
            }),
            watch: Mutex::new(None),
        }
    }
}

/// Hot-reloading module manager
///
/// ```rust,ignore
/// let manager = Manager::new(ManagerConfig::new("/srv/modules"));
/// manager.start().await?;
/// let result = manager.call("testplugin", "test", vec![Value::Str("world".into())]);
/// manager.stop().await;
/// ```
pub struct Manager {
    shared: Arc<Shared>,
    /// Serializes start and stop
    watch: Mutex<Option<WatchLoop>>,
}

struct Shared {
    config: ManagerConfig,
    loader: Arc<dyn ArtifactLoader>,
    observer: Arc<dyn LifecycleObserver>,
    registry: Registry,
    /// Path cache: one module per artifact path, kept across unloads
    modules: RwLock<HashMap<PathBuf, ModuleHandle>>,
    running: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Manager {
    /// Manager loading native libraries
    pub fn new(config: ManagerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            loader: None,
            observer: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Scan the root directory, request a load for every module file, and
    /// start watching for changes
    ///
    /// The watch is established before the scan so no file created in
    /// between is missed. Calling `start` on a running manager does nothing.
    pub async fn start(&self) -> Result<(), HostError> {
        let mut watch = self.watch.lock().await;
        if self.is_running() {
            return Ok(());
        }

        let config = &self.shared.config;
        let root = config.root.canonicalize().map_err(|source| HostError::Io {
            path: config.root.clone(),
            source,
        })?;

        let shared = Arc::downgrade(&self.shared);
        let watch_loop = WatchLoop::spawn(&root, move |path, op| {
            if let Some(shared) = shared.upgrade() {
                shared.dispatch(path, op);
            }
        })?;

        let paths = match watcher::scan_directory(&root, config) {
            Ok(paths) => paths,
            Err(e) => {
                watch_loop.shutdown().await;
                return Err(e);
            }
        };
        for path in &paths {
            self.shared.module_for(path).request_load();
        }

        *watch = Some(watch_loop);
        self.shared.running.store(true, Ordering::SeqCst);
        tracing::info!(
            root = %root.display(),
            suffix = %config.suffix,
            modules = paths.len(),
            "Manager started"
        );
        Ok(())
    }

    /// Stop watching and unload every module immediately
    ///
    /// The path cache is emptied, so a later `start` begins from a fresh
    /// scan.
    pub async fn stop(&self) {
        let mut watch = self.watch.lock().await;
        if let Some(watch_loop) = watch.take() {
            watch_loop.shutdown().await;
        }

        let modules: Vec<ModuleHandle> = self
            .shared
            .modules
            .write()
            .unwrap()
            .drain()
            .map(|(_, module)| module)
            .collect();
        for module in &modules {
            module.shutdown().await;
        }

        if self.shared.running.swap(false, Ordering::SeqCst) {
            tracing::info!(modules = modules.len(), "Manager stopped");
        }
    }

    fn ensure_running(&self) -> Result<(), HostError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HostError::NotRunning)
        }
    }

    /// Highest loaded version of `name`
    pub fn resolve(&self, name: &str) -> Result<ModuleHandle, HostError> {
        self.ensure_running()?;
        self.shared.registry.latest(name)
    }

    /// Exactly `version` of `name`
    pub fn resolve_versioned(&self, name: &str, version: u64) -> Result<ModuleHandle, HostError> {
        self.ensure_running()?;
        self.shared.registry.get(name, version)
    }

    /// Adapter for `function` of the latest version of `name`
    pub fn function(&self, name: &str, function: &str) -> Result<Arc<CallAdapter>, HostError> {
        self.resolve(name)?.function(function)
    }

    /// Resolve and invoke; every failure comes back in the result vector
    pub fn call(&self, name: &str, function: &str, args: Vec<Value>) -> Vec<Value> {
        match self.function(name, function) {
            Ok(adapter) => adapter.invoke(args),
            Err(e) => {
                tracing::debug!(module = %name, function = %function, error = %e, "Call not dispatched");
                vec![Value::Error(e.into_call_error())]
            }
        }
    }

    /// Every module in the path cache, sorted by path
    ///
    /// Entries are kept after their file is removed: the module stays here
    /// `Unloaded`, with its worker parked, so a file reappearing at the same
    /// path revives the same handle. The cache is only drained by [`stop`].
    ///
    /// [`stop`]: Manager::stop
    pub fn modules(&self) -> Vec<ModuleHandle> {
        let mut modules: Vec<ModuleHandle> =
            self.shared.modules.read().unwrap().values().cloned().collect();
        modules.sort_by(|a, b| a.path().cmp(b.path()));
        modules
    }

    /// The module for an artifact path, if one was ever seen
    pub fn module_at(&self, path: impl AsRef<Path>) -> Option<ModuleHandle> {
        let path = path.as_ref();
        let modules = self.shared.modules.read().unwrap();
        modules.get(path).cloned().or_else(|| {
            let canonical = path.canonicalize().ok()?;
            modules.get(&canonical).cloned()
        })
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    /// Cached module for `path`, created and started on first sight
    fn module_for(self: &Arc<Self>, path: &Path) -> ModuleHandle {
        if let Some(module) = self.modules.read().unwrap().get(path) {
            return Arc::clone(module);
        }

        let mut modules = self.modules.write().unwrap();
        let module = modules
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                tracing::debug!(path = %path.display(), "Tracking new module");
                Module::new(path, self.config.debounce())
            })
            .clone();
        let transitions: Weak<dyn Transitions> = Arc::downgrade(self) as Weak<Shared>;
        module.start(transitions);
        module
    }

    fn dispatch(self: &Arc<Self>, path: &Path, op: WatchOp) {
        if !self.config.matches(path) {
            tracing::debug!(path = %path.display(), ?op, "Ignoring non-module file");
            return;
        }

        tracing::debug!(path = %path.display(), ?op, "Module file changed");
        match op {
            WatchOp::Create => self.module_for(path).request_load(),
            WatchOp::Write => self.module_for(path).request_reload(),
            WatchOp::Remove => {
                let module = self.modules.read().unwrap().get(path).cloned();
                if let Some(module) = module {
                    module.request_unload();
                }
            }
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Transitions for Shared {
    fn loader(&self) -> &dyn ArtifactLoader {
        self.loader.as_ref()
    }

    fn register(&self, module: &ModuleHandle, identity: &ModuleIdentity) -> Result<(), HostError> {
        self.registry.register(module, identity)
    }

    fn deregister(&self, module: &ModuleHandle, identity: &ModuleIdentity) {
        self.registry.deregister(module, identity);
    }

    fn loaded(&self, module: &ModuleHandle) {
        self.observer.on_loaded(module);
        if let Some(identity) = module.identity() {
            self.publish(LifecycleEvent::Loaded {
                path: module.path().to_path_buf(),
                identity,
            });
        }
    }

    fn reloaded(&self, module: &ModuleHandle) {
        self.observer.on_reloaded(module);
        self.publish(LifecycleEvent::Reloaded {
            path: module.path().to_path_buf(),
            identity: module.identity(),
        });
    }

    fn unloaded(&self, module: &ModuleHandle) {
        self.observer.on_unloaded(module);
        self.publish(LifecycleEvent::Unloaded {
            path: module.path().to_path_buf(),
            identity: module.identity(),
        });
    }

    fn failed(&self, module: &ModuleHandle, error: &HostError) {
        self.observer.on_error(module, error);
        self.publish(LifecycleEvent::failed(module, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_api::ErrorKind;

    #[test]
    fn test_calls_before_start_are_not_running() {
        let manager = Manager::new(ManagerConfig::new("/nonexistent"));
        assert!(!manager.is_running());
        assert_eq!(manager.resolve("m").unwrap_err().kind(), ErrorKind::NotRunning);
        assert_eq!(
            manager.resolve_versioned("m", 1).unwrap_err().kind(),
            ErrorKind::NotRunning
        );

        let result = manager.call("m", "f", vec![]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_error().unwrap().kind, ErrorKind::NotRunning);
    }

    #[tokio::test]
    async fn test_start_missing_root_fails() {
        let manager = Manager::new(ManagerConfig::new("/nonexistent/modules"));
        let err = manager.start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFailure);
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let manager = Manager::new(ManagerConfig::default());
        manager.stop().await;
        assert!(!manager.is_running());
    }
}
