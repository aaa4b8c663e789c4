//! Module registry
//!
//! Maps a logical module name to its loaded versions. Versions are kept in
//! an ordered map so the latest one is the last key.

use crate::module::{ModuleHandle, ModuleIdentity};
use crate::HostError;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Thread-safe index of loaded modules by name and version
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Loaded versions indexed by module name
    modules: HashMap<String, BTreeMap<u64, ModuleHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `module` under `identity` unless a different module holds it
    ///
    /// Checking and inserting happen under one write lock, so two modules
    /// loading the same identity concurrently cannot both succeed.
    pub(crate) fn register(
        &self,
        module: &ModuleHandle,
        identity: &ModuleIdentity,
    ) -> Result<(), HostError> {
        let mut inner = self.inner.write().unwrap();
        let versions = inner.modules.entry(identity.name.clone()).or_default();

        if let Some(existing) = versions.get(&identity.version) {
            if !Arc::ptr_eq(existing, module) {
                return Err(HostError::IdentityConflict {
                    name: identity.name.clone(),
                    version: identity.version,
                });
            }
        }

        versions.insert(identity.version, Arc::clone(module));
        tracing::debug!(module = %identity, "Registered module");
        Ok(())
    }

    /// Remove `module` from under `identity`; returns false if it was not there
    pub(crate) fn deregister(&self, module: &ModuleHandle, identity: &ModuleIdentity) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(versions) = inner.modules.get_mut(&identity.name) else {
            return false;
        };

        let removed = match versions.get(&identity.version) {
            Some(existing) if Arc::ptr_eq(existing, module) => {
                versions.remove(&identity.version);
                true
            }
            _ => false,
        };

        if versions.is_empty() {
            inner.modules.remove(&identity.name);
        }
        if removed {
            tracing::debug!(module = %identity, "Deregistered module");
        }
        removed
    }

    /// Highest loaded version of `name`
    pub fn latest(&self, name: &str) -> Result<ModuleHandle, HostError> {
        self.inner
            .read()
            .unwrap()
            .modules
            .get(name)
            .and_then(|versions| versions.last_key_value())
            .map(|(_, module)| Arc::clone(module))
            .ok_or_else(|| HostError::NotFound {
                name: name.to_string(),
                version: None,
            })
    }

    /// Exactly `version` of `name`
    pub fn get(&self, name: &str, version: u64) -> Result<ModuleHandle, HostError> {
        self.inner
            .read()
            .unwrap()
            .modules
            .get(name)
            .and_then(|versions| versions.get(&version))
            .map(Arc::clone)
            .ok_or_else(|| HostError::NotFound {
                name: name.to_string(),
                version: Some(version),
            })
    }

    /// Loaded versions of `name` in ascending order
    pub fn versions(&self, name: &str) -> Vec<u64> {
        self.inner
            .read()
            .unwrap()
            .modules
            .get(name)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Names with at least one loaded version, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().unwrap().modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered (name, version) entries
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .modules
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use hotmod_api::ErrorKind;
    use std::time::Duration;

    fn module(path: &str) -> ModuleHandle {
        Module::new(path, Duration::from_millis(10))
    }

    #[test]
    fn test_latest_is_highest_version() {
        let registry = Registry::new();
        for version in [1, 3, 2] {
            let m = module(&format!("/m{}.so", version));
            registry.register(&m, &ModuleIdentity::new("m", version)).unwrap();
        }

        let latest = registry.latest("m").unwrap();
        assert_eq!(latest.path(), std::path::Path::new("/m3.so"));
        assert_eq!(registry.versions("m"), vec![1, 2, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_exact_lookup() {
        let registry = Registry::new();
        let m = module("/m.so");
        registry.register(&m, &ModuleIdentity::new("m", 7)).unwrap();

        assert!(Arc::ptr_eq(&registry.get("m", 7).unwrap(), &m));
        let err = registry.get("m", 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(registry.latest("other").is_err());
    }

    #[test]
    fn test_conflict_keeps_first_holder() {
        let registry = Registry::new();
        let first = module("/a.so");
        let second = module("/b.so");
        let identity = ModuleIdentity::new("m", 1);

        registry.register(&first, &identity).unwrap();
        let err = registry.register(&second, &identity).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityConflict);
        assert!(Arc::ptr_eq(&registry.get("m", 1).unwrap(), &first));

        // re-registering the holder is not a conflict
        registry.register(&first, &identity).unwrap();
    }

    #[test]
    fn test_deregister_only_removes_holder() {
        let registry = Registry::new();
        let first = module("/a.so");
        let second = module("/b.so");
        let identity = ModuleIdentity::new("m", 1);

        registry.register(&first, &identity).unwrap();
        assert!(!registry.deregister(&second, &identity));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister(&first, &identity));
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
