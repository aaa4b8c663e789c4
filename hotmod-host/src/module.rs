//! Per-module lifecycle state machine
//!
//! Every artifact path gets one [`Module`] driven by its own worker task.
//! Lifecycle requests are debounced: a request arms a deadline, any request
//! arriving before the deadline replaces the pending one and rearms it, and
//! only the last one is acted on. The worker executes one transition at a
//! time, so a module is never loading and unloading concurrently.

use crate::artifact::{Artifact, ArtifactLoader};
use crate::dispatch::CallAdapter;
use crate::HostError;
use hotmod_api::{Value, API_VERSION};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Shared handle to a module
pub type ModuleHandle = Arc<Module>;

/// Lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Reloading,
    Unloading,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Reloading => "reloading",
            Self::Unloading => "unloading",
        };
        f.write_str(name)
    }
}

/// Lifecycle request accepted by a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Load,
    Reload,
    Unload,
}

/// Decide what a pending request means for a module in `state`
///
/// Load and reload collapse into "bring the artifact up to date": an
/// unloaded module loads, a loaded one reloads. `None` means nothing to do.
pub fn coalesce(request: Request, state: ModuleState) -> Option<Request> {
    match (request, state) {
        (Request::Unload, ModuleState::Unloaded | ModuleState::Unloading) => None,
        (Request::Unload, _) => Some(Request::Unload),
        (Request::Load | Request::Reload, ModuleState::Unloaded) => Some(Request::Load),
        (Request::Load | Request::Reload, ModuleState::Loaded) => Some(Request::Reload),
        (_, ModuleState::Loading | ModuleState::Reloading | ModuleState::Unloading) => None,
    }
}

/// Name and version a module reported from its entry point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: u64,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@0x{:x}", self.name, self.version)
    }
}

/// Callbacks from a module's worker into its owner
pub(crate) trait Transitions: Send + Sync {
    fn loader(&self) -> &dyn ArtifactLoader;

    /// Record the identity; fails when another module holds it
    fn register(&self, module: &ModuleHandle, identity: &ModuleIdentity) -> Result<(), HostError>;

    fn deregister(&self, module: &ModuleHandle, identity: &ModuleIdentity);

    fn loaded(&self, module: &ModuleHandle);

    fn reloaded(&self, module: &ModuleHandle);

    fn unloaded(&self, module: &ModuleHandle);

    fn failed(&self, module: &ModuleHandle, error: &HostError);
}

enum Command {
    Request(Request),
    Shutdown(oneshot::Sender<()>),
}

/// One artifact path and its lifecycle
pub struct Module {
    path: PathBuf,
    debounce: Duration,
    state: watch::Sender<ModuleState>,
    identity: RwLock<Option<ModuleIdentity>>,
    artifact: Mutex<Option<Box<dyn Artifact>>>,
    generation: AtomicU64,
    adapters: Mutex<HashMap<String, Arc<CallAdapter>>>,
    requests: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Module {
    /// Create an idle module; requests queue until the worker starts
    pub(crate) fn new(path: impl Into<PathBuf>, debounce: Duration) -> ModuleHandle {
        let (requests, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            path: path.into(),
            debounce,
            state: watch::Sender::new(ModuleState::Unloaded),
            identity: RwLock::new(None),
            artifact: Mutex::new(None),
            generation: AtomicU64::new(0),
            adapters: Mutex::new(HashMap::new()),
            requests,
            inbox: Mutex::new(Some(inbox)),
            worker: Mutex::new(None),
        })
    }

    /// Spawn the worker task; later calls are ignored
    pub(crate) fn start(self: &Arc<Self>, transitions: Weak<dyn Transitions>) {
        let Some(inbox) = self.inbox.lock().unwrap().take() else {
            return;
        };
        let handle = tokio::spawn(run_worker(Arc::downgrade(self), inbox, transitions));
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Unload immediately, bypassing the debounce, and stop the worker
    pub(crate) async fn shutdown(&self) {
        if self.inbox.lock().unwrap().is_some() {
            // never started, nothing to unload
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.requests.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ModuleState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ModuleState> {
        self.state.subscribe()
    }

    /// Identity of the last successful load
    pub fn identity(&self) -> Option<ModuleIdentity> {
        self.identity.read().unwrap().clone()
    }

    pub fn name(&self) -> Option<String> {
        self.identity.read().unwrap().as_ref().map(|id| id.name.clone())
    }

    pub fn version(&self) -> Option<u64> {
        self.identity.read().unwrap().as_ref().map(|id| id.version)
    }

    /// Number of successful loads so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn request_load(&self) {
        self.request(Request::Load);
    }

    pub fn request_reload(&self) {
        self.request(Request::Reload);
    }

    pub fn request_unload(&self) {
        self.request(Request::Unload);
    }

    fn request(&self, request: Request) {
        if self.requests.send(Command::Request(request)).is_err() {
            tracing::debug!(path = %self.path.display(), ?request, "Module worker is gone");
        }
    }

    /// Resolve an exported function, caching the adapter per load generation
    pub fn function(&self, name: &str) -> Result<Arc<CallAdapter>, HostError> {
        let artifact = self.artifact.lock().unwrap();
        let Some(artifact) = artifact.as_ref() else {
            return Err(HostError::NotLoaded {
                path: self.path.clone(),
            });
        };

        let mut adapters = self.adapters.lock().unwrap();
        if let Some(adapter) = adapters.get(name) {
            return Ok(Arc::clone(adapter));
        }

        let target = artifact.lookup(name)?;
        let module = self.name().unwrap_or_default();
        let adapter = Arc::new(CallAdapter::new(module, name, self.generation(), target));
        adapters.insert(name.to_string(), Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Resolve and invoke in one step; lookup failures land in the result vector
    pub fn call(&self, function: &str, args: Vec<Value>) -> Vec<Value> {
        match self.function(function) {
            Ok(adapter) => adapter.invoke(args),
            Err(e) => vec![Value::Error(e.into_call_error())],
        }
    }

    fn set_state(&self, state: ModuleState) {
        let previous = self.state.send_replace(state);
        tracing::trace!(
            path = %self.path.display(),
            from = %previous,
            to = %state,
            "Module state changed"
        );
    }

    fn execute(self: &Arc<Self>, request: Request, transitions: &dyn Transitions) {
        let Some(action) = coalesce(request, self.state()) else {
            tracing::debug!(
                path = %self.path.display(),
                ?request,
                state = %self.state(),
                "Nothing to do for request"
            );
            return;
        };

        match action {
            Request::Load => self.load(transitions),
            Request::Reload => self.reload(transitions),
            Request::Unload => self.unload(transitions),
        }
    }

    fn open(&self, loader: &dyn ArtifactLoader) -> Result<(Box<dyn Artifact>, ModuleIdentity), HostError> {
        let artifact = loader.open(&self.path)?;
        let manifest = artifact.entry()?;
        if manifest.api_version != API_VERSION {
            return Err(HostError::ApiVersionMismatch {
                expected: API_VERSION,
                actual: manifest.api_version,
            });
        }
        Ok((artifact, ModuleIdentity::new(manifest.name, manifest.version)))
    }

    fn load(self: &Arc<Self>, transitions: &dyn Transitions) {
        self.set_state(ModuleState::Loading);
        self.adapters.lock().unwrap().clear();

        let (artifact, identity) = match self.open(transitions.loader()) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to load module");
                self.set_state(ModuleState::Unloaded);
                transitions.failed(self, &e);
                return;
            }
        };

        // generation moves together with the artifact, under its lock
        {
            let mut slot = self.artifact.lock().unwrap();
            *slot = Some(artifact);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        let previous = self.identity.write().unwrap().replace(identity.clone());
        self.set_state(ModuleState::Loaded);

        if let Err(e) = transitions.register(self, &identity) {
            tracing::warn!(
                path = %self.path.display(),
                module = %identity,
                error = %e,
                "Rejected module"
            );
            let rejected = {
                let mut slot = self.artifact.lock().unwrap();
                self.adapters.lock().unwrap().clear();
                self.generation.fetch_sub(1, Ordering::SeqCst);
                slot.take()
            };
            drop(rejected);
            *self.identity.write().unwrap() = previous;
            self.set_state(ModuleState::Unloaded);
            transitions.failed(self, &e);
            return;
        }

        tracing::info!(path = %self.path.display(), module = %identity, "Module loaded");
        transitions.loaded(self);
    }

    fn reload(self: &Arc<Self>, transitions: &dyn Transitions) {
        self.set_state(ModuleState::Reloading);
        let outcome = self
            .artifact
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|artifact| artifact.reload());
        self.set_state(ModuleState::Loaded);

        match outcome {
            Some(Err(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Reload hook failed");
                transitions.failed(self, &e);
            }
            _ => {
                tracing::info!(path = %self.path.display(), "Module reloaded");
                transitions.reloaded(self);
            }
        }
    }

    fn unload(self: &Arc<Self>, transitions: &dyn Transitions) {
        self.set_state(ModuleState::Unloading);

        let artifact = self.artifact.lock().unwrap().take();
        if let Some(Err(e)) = artifact.as_ref().and_then(|artifact| artifact.unload()) {
            tracing::warn!(path = %self.path.display(), error = %e, "Unload hook failed");
            transitions.failed(self, &e);
        }

        self.adapters.lock().unwrap().clear();
        drop(artifact);

        if let Some(identity) = self.identity() {
            transitions.deregister(self, &identity);
        }

        self.set_state(ModuleState::Unloaded);
        tracing::info!(path = %self.path.display(), "Module unloaded");
        transitions.unloaded(self);
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("identity", &self.identity())
            .field("generation", &self.generation())
            .finish()
    }
}

async fn run_worker(
    module: Weak<Module>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
    transitions: Weak<dyn Transitions>,
) {
    let Some(debounce) = module.upgrade().map(|m| m.debounce) else {
        return;
    };
    let mut pending: Option<Request> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = deadline;
        tokio::select! {
            command = inbox.recv() => match command {
                Some(Command::Request(request)) => {
                    if let Some(replaced) = pending.replace(request) {
                        tracing::trace!(?replaced, ?request, "Coalesced lifecycle request");
                    }
                    deadline = Some(Instant::now() + debounce);
                }
                Some(Command::Shutdown(done)) => {
                    if let (Some(module), Some(transitions)) = (module.upgrade(), transitions.upgrade()) {
                        module.execute(Request::Unload, transitions.as_ref());
                    }
                    let _ = done.send(());
                    break;
                }
                None => break,
            },

            _ = async move {
                match timer {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                deadline = None;
                let Some(request) = pending.take() else {
                    continue;
                };
                let (Some(module), Some(transitions)) = (module.upgrade(), transitions.upgrade()) else {
                    break;
                };
                module.execute(request, transitions.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{BuiltinLoader, BuiltinModule};
    use hotmod_api::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        loader: BuiltinLoader,
        loaded: AtomicUsize,
        reloaded: AtomicUsize,
        unloaded: AtomicUsize,
        failures: Mutex<Vec<ErrorKind>>,
        registered: Mutex<Vec<ModuleIdentity>>,
        seen_on_register: Mutex<Vec<(ModuleState, u64)>>,
    }

    impl Transitions for Recorder {
        fn loader(&self) -> &dyn ArtifactLoader {
            &self.loader
        }

        fn register(&self, module: &ModuleHandle, identity: &ModuleIdentity) -> Result<(), HostError> {
            self.seen_on_register
                .lock()
                .unwrap()
                .push((module.state(), module.generation()));
            let mut registered = self.registered.lock().unwrap();
            if registered.contains(identity) {
                return Err(HostError::IdentityConflict {
                    name: identity.name.clone(),
                    version: identity.version,
                });
            }
            registered.push(identity.clone());
            Ok(())
        }

        fn deregister(&self, _module: &ModuleHandle, identity: &ModuleIdentity) {
            self.registered.lock().unwrap().retain(|id| id != identity);
        }

        fn loaded(&self, _module: &ModuleHandle) {
            self.loaded.fetch_add(1, Ordering::SeqCst);
        }

        fn reloaded(&self, _module: &ModuleHandle) {
            self.reloaded.fetch_add(1, Ordering::SeqCst);
        }

        fn unloaded(&self, _module: &ModuleHandle) {
            self.unloaded.fetch_add(1, Ordering::SeqCst);
        }

        fn failed(&self, _module: &ModuleHandle, error: &HostError) {
            self.failures.lock().unwrap().push(error.kind());
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(20);

    fn setup(file_name: &str) -> (Arc<Recorder>, ModuleHandle) {
        let recorder = Arc::new(Recorder::default());
        recorder.loader.register("m.mod", || {
            BuiltinModule::new("m", 7).function("echo", |s: String| s)
        });
        let module = spawn_module(&recorder, &format!("/modules/{}", file_name));
        (recorder, module)
    }

    fn spawn_module(recorder: &Arc<Recorder>, path: &str) -> ModuleHandle {
        let module = Module::new(path, DEBOUNCE);
        let transitions: Weak<dyn Transitions> = Arc::downgrade(recorder) as Weak<Recorder>;
        module.start(transitions);
        module
    }

    async fn settle() {
        tokio::time::sleep(DEBOUNCE * 5).await;
    }

    #[test]
    fn test_coalesce_table() {
        use ModuleState::*;
        assert_eq!(coalesce(Request::Load, Unloaded), Some(Request::Load));
        assert_eq!(coalesce(Request::Reload, Unloaded), Some(Request::Load));
        assert_eq!(coalesce(Request::Load, Loaded), Some(Request::Reload));
        assert_eq!(coalesce(Request::Reload, Loaded), Some(Request::Reload));
        assert_eq!(coalesce(Request::Unload, Loaded), Some(Request::Unload));
        assert_eq!(coalesce(Request::Unload, Unloaded), None);
    }

    #[tokio::test]
    async fn test_load_and_call() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        settle().await;

        assert_eq!(module.state(), ModuleState::Loaded);
        assert_eq!(module.identity(), Some(ModuleIdentity::new("m", 7)));
        assert_eq!(module.generation(), 1);
        assert_eq!(recorder.loaded.load(Ordering::SeqCst), 1);

        let result = module.call("echo", vec![Value::Str("hi".into())]);
        assert_eq!(result, vec![Value::Str("hi".into())]);
    }

    #[tokio::test]
    async fn test_burst_collapses_to_single_transition() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        settle().await;

        for _ in 0..5 {
            module.request_reload();
        }
        settle().await;

        assert_eq!(recorder.loaded.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.reloaded.load(Ordering::SeqCst), 1);
        assert_eq!(module.state(), ModuleState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_window_resets_on_each_request() {
        let (recorder, module) = setup("m.mod");
        let gap = DEBOUNCE * 6 / 10;

        // each request lands before the previous window closes
        for _ in 0..5 {
            module.request_reload();
            tokio::time::sleep(gap).await;
            assert_eq!(recorder.loaded.load(Ordering::SeqCst), 0);
            assert_eq!(module.state(), ModuleState::Unloaded);
        }

        tokio::time::sleep(DEBOUNCE - gap + Duration::from_millis(1)).await;
        assert_eq!(recorder.loaded.load(Ordering::SeqCst), 1);
        assert_eq!(module.state(), ModuleState::Loaded);
    }

    #[tokio::test]
    async fn test_loaded_before_registration() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        settle().await;

        assert_eq!(
            *recorder.seen_on_register.lock().unwrap(),
            vec![(ModuleState::Loaded, 1)]
        );
        assert_eq!(module.function("echo").unwrap().generation(), 1);
    }

    #[tokio::test]
    async fn test_rejected_load_rolls_back() {
        let (recorder, first) = setup("m.mod");
        first.request_load();
        settle().await;

        let second = spawn_module(&recorder, "/elsewhere/m.mod");
        second.request_load();
        settle().await;

        assert_eq!(second.state(), ModuleState::Unloaded);
        assert_eq!(second.generation(), 0);
        assert_eq!(second.identity(), None);
        assert_eq!(second.function("echo").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            *recorder.failures.lock().unwrap(),
            vec![ErrorKind::IdentityConflict]
        );

        assert_eq!(first.state(), ModuleState::Loaded);
        assert_eq!(first.generation(), 1);
    }

    #[tokio::test]
    async fn test_last_request_wins() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        module.request_unload();
        settle().await;

        assert_eq!(recorder.loaded.load(Ordering::SeqCst), 0);
        assert_eq!(module.state(), ModuleState::Unloaded);
    }

    #[tokio::test]
    async fn test_unload_clears_adapters() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        settle().await;
        let adapter = module.function("echo").unwrap();
        assert_eq!(adapter.generation(), 1);

        module.request_unload();
        settle().await;

        assert_eq!(module.state(), ModuleState::Unloaded);
        assert_eq!(recorder.unloaded.load(Ordering::SeqCst), 1);
        assert!(recorder.registered.lock().unwrap().is_empty());
        assert_eq!(module.function("echo").unwrap_err().kind(), ErrorKind::NotFound);
        // identity survives unload
        assert_eq!(module.name().as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn test_open_failure_stays_unloaded() {
        let (recorder, module) = setup("unknown.mod");
        module.request_load();
        settle().await;

        assert_eq!(module.state(), ModuleState::Unloaded);
        assert_eq!(module.identity(), None);
        assert_eq!(*recorder.failures.lock().unwrap(), vec![ErrorKind::OpenFailure]);
    }

    #[tokio::test]
    async fn test_shutdown_unloads_immediately() {
        let (recorder, module) = setup("m.mod");
        module.request_load();
        settle().await;

        module.shutdown().await;
        assert_eq!(module.state(), ModuleState::Unloaded);
        assert_eq!(recorder.unloaded.load(Ordering::SeqCst), 1);
    }
}
