//! In-process modules
//!
//! [`BuiltinLoader`] resolves artifact files by file name to modules defined
//! in the host process. The file still has to exist in the watched directory
//! so that it drives the lifecycle, but its contents are never read. This is
//! how the host embeds first-party modules and how the lifecycle engine is
//! tested without compiling shared libraries.

use crate::artifact::{Artifact, ArtifactLoader, ExportedFunction};
use crate::HostError;
use hotmod_api::{Exportable, FunctionExport, ModuleManifest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

type Hook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
type Factory = Arc<dyn Fn() -> BuiltinModule + Send + Sync>;

/// A module defined in the host process
///
/// ```rust,ignore
/// let module = BuiltinModule::new("testplugin", 0x0001_0000)
///     .function("test", |data: String| format!("hello {}", data))
///     .on_unload(|| Ok(()));
/// ```
pub struct BuiltinModule {
    manifest: ModuleManifest,
    functions: HashMap<String, Arc<FunctionExport>>,
    load: Option<Hook>,
    reload: Option<Hook>,
    unload: Option<Hook>,
}

impl BuiltinModule {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            manifest: ModuleManifest::new(name, version),
            functions: HashMap::new(),
            load: None,
            reload: None,
            unload: None,
        }
    }

    /// Export a typed function under `name`
    pub fn function<F, Args>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Exportable<Args>,
        Args: 'static,
    {
        self.functions
            .insert(name.into(), Arc::new(FunctionExport::new(f)));
        self
    }

    /// Run during the entry point; an error rejects the module
    pub fn on_load(mut self, hook: impl Fn() -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.load = Some(Arc::new(hook));
        self
    }

    pub fn on_reload(
        mut self,
        hook: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.reload = Some(Arc::new(hook));
        self
    }

    pub fn on_unload(
        mut self,
        hook: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.unload = Some(Arc::new(hook));
        self
    }

    /// Report a different API version from the entry point
    pub fn with_api_version(mut self, api_version: u32) -> Self {
        self.manifest.api_version = api_version;
        self
    }
}

/// A builtin module opened from an artifact path
struct BuiltinArtifact {
    path: PathBuf,
    module: BuiltinModule,
}

impl Artifact for BuiltinArtifact {
    fn entry(&self) -> Result<ModuleManifest, HostError> {
        if let Some(load) = &self.module.load {
            load().map_err(|reason| HostError::EntryFailed {
                path: self.path.clone(),
                reason,
            })?;
        }
        Ok(self.module.manifest.clone())
    }

    fn reload(&self) -> Option<Result<(), HostError>> {
        self.module.reload.as_ref().map(|hook| {
            hook().map_err(|message| HostError::Hook {
                hook: "reload",
                message,
            })
        })
    }

    fn unload(&self) -> Option<Result<(), HostError>> {
        self.module.unload.as_ref().map(|hook| {
            hook().map_err(|message| HostError::Hook {
                hook: "unload",
                message,
            })
        })
    }

    fn lookup(&self, function: &str) -> Result<Arc<dyn ExportedFunction>, HostError> {
        self.module
            .functions
            .get(function)
            .map(|f| Arc::clone(f) as Arc<dyn ExportedFunction>)
            .ok_or_else(|| HostError::SymbolNotFound(function.to_string()))
    }
}

/// Loader resolving artifact file names to in-process modules
///
/// Each open calls the registered factory again, so a reopened file yields a
/// fresh module just like reopening a rebuilt library would.
#[derive(Clone, Default)]
pub struct BuiltinLoader {
    factories: Arc<RwLock<HashMap<String, Factory>>>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for artifacts named `file_name`
    pub fn register(
        &self,
        file_name: impl Into<String>,
        factory: impl Fn() -> BuiltinModule + Send + Sync + 'static,
    ) {
        self.factories
            .write()
            .unwrap()
            .insert(file_name.into(), Arc::new(factory));
    }

    /// Remove a factory; later opens of that file fail
    pub fn unregister(&self, file_name: &str) -> bool {
        self.factories.write().unwrap().remove(file_name).is_some()
    }
}

impl ArtifactLoader for BuiltinLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Artifact>, HostError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| HostError::open_failure(path, "invalid file name"))?;

        let factory = self
            .factories
            .read()
            .unwrap()
            .get(file_name)
            .cloned()
            .ok_or_else(|| HostError::open_failure(path, "no builtin module for this file"))?;

        tracing::debug!(path = %path.display(), "Opened builtin module");
        Ok(Box::new(BuiltinArtifact {
            path: path.to_path_buf(),
            module: factory(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_api::{ErrorKind, Value};

    fn testplugin() -> BuiltinModule {
        BuiltinModule::new("testplugin", 0x0001_0000)
            .function("test", |data: String| format!("hello {}", data))
    }

    fn open(module: BuiltinModule) -> BuiltinArtifact {
        BuiltinArtifact {
            path: PathBuf::from("/modules/testplugin.so"),
            module,
        }
    }

    #[test]
    fn test_open_registered_module() {
        let loader = BuiltinLoader::new();
        loader.register("testplugin.so", testplugin);

        let artifact = loader.open(Path::new("/modules/testplugin.so")).unwrap();
        let manifest = artifact.entry().unwrap();
        assert_eq!(manifest.name, "testplugin");
        assert_eq!(manifest.version, 0x0001_0000);

        let test = artifact.lookup("test").unwrap();
        let result = test.call(vec![Value::Str("world".into())]).unwrap();
        assert_eq!(result, vec![Value::Str("hello world".into())]);
    }

    #[test]
    fn test_open_unknown_file() {
        let loader = BuiltinLoader::new();
        let err = loader.open(Path::new("/modules/other.so")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::OpenFailure);
    }

    #[test]
    fn test_unregister() {
        let loader = BuiltinLoader::new();
        loader.register("testplugin.so", testplugin);
        assert!(loader.unregister("testplugin.so"));
        assert!(!loader.unregister("testplugin.so"));
        assert!(loader.open(Path::new("testplugin.so")).is_err());
    }

    #[test]
    fn test_missing_function() {
        let artifact = open(testplugin());
        let err = artifact.lookup("missing").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
    }

    #[test]
    fn test_hooks() {
        let module = open(testplugin().on_unload(|| Err("busy".to_string())));
        assert!(module.reload().is_none());
        let err = module.unload().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Module);
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn test_entry_rejections() {
        let refused = open(testplugin().on_load(|| Err("no config".to_string())));
        let err = refused.entry().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Module);
        match err {
            HostError::EntryFailed { path, reason } => {
                assert_eq!(path, Path::new("/modules/testplugin.so"));
                assert_eq!(reason, "no config");
            }
            other => panic!("unexpected error {:?}", other),
        }

        let mismatched = open(testplugin().with_api_version(hotmod_api::API_VERSION + 1));
        assert_eq!(
            mismatched.entry().unwrap().api_version,
            hotmod_api::API_VERSION + 1
        );
    }
}
