//! Cast/codebase registry (C3)
//!
//! Maps cast and codebase names to filesystem roots so peers can be
//! addressed by name instead of path. Backed by a TOML file at
//! `$CAST_HOME/registry.toml` (default `~/.cast/registry.toml`, overridable
//! via the `CAST_HOME` environment variable), guarded by a `.lock` sibling
//! file so two invocations don't interleave writes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::CastConfig;
use crate::error::{HsyncError, HsyncResult};

const REGISTRY_FILE: &str = "registry.toml";
const LOCK_FILE: &str = "registry.toml.lock";

/// One registered root, either a cast or a codebase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub root: PathBuf,
}

/// In-memory view of the registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registry {
    #[serde(default)]
    pub casts: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    pub codebases: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    pub fn upsert_cast(&mut self, name: impl Into<String>, root: PathBuf) {
        self.casts.insert(name.into(), RegistryEntry { root });
    }

    pub fn upsert_codebase(&mut self, name: impl Into<String>, root: PathBuf) {
        self.codebases.insert(name.into(), RegistryEntry { root });
    }

    pub fn remove_cast(&mut self, name: &str) -> Option<RegistryEntry> {
        self.casts.remove(name)
    }

    pub fn remove_codebase(&mut self, name: &str) -> Option<RegistryEntry> {
        self.codebases.remove(name)
    }

    pub fn cast_root(&self, name: &str) -> Option<&Path> {
        self.casts.get(name).map(|e| e.root.as_path())
    }

    pub fn codebase_root(&self, name: &str) -> Option<&Path> {
        self.codebases.get(name).map(|e| e.root.as_path())
    }
}

/// `$CAST_HOME`, defaulting to `~/.cast`.
pub fn cast_home() -> PathBuf {
    if let Ok(dir) = std::env::var("CAST_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".cast"))
        .unwrap_or_else(|| PathBuf::from(".cast"))
}

/// File-backed, lock-guarded registry store.
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl RegistryStore {
    pub fn new(home: PathBuf) -> Self {
        Self {
            path: home.join(REGISTRY_FILE),
            lock_path: home.join(LOCK_FILE),
        }
    }

    pub fn default_store() -> Self {
        Self::new(cast_home())
    }

    fn load_from_disk(&self) -> HsyncResult<Registry> {
        if !self.path.exists() {
            return Ok(Registry::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Registry::default());
        }
        Ok(toml::from_str(&content)?)
    }

    fn save_to_disk(&self, registry: &Registry) -> HsyncResult<()> {
        let toml_str = toml::to_string_pretty(registry)?;
        crate::frontmatter::atomic_write(&self.path, toml_str.as_bytes())
    }

    /// Load the registry, run `f` against a mutable copy, and persist the
    /// result — all while holding the exclusive lock.
    pub fn update<F>(&self, f: F) -> HsyncResult<Registry>
    where
        F: FnOnce(&mut Registry),
    {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let mut registry = self.load_from_disk()?;
        f(&mut registry);
        self.save_to_disk(&registry)?;

        FileExt::unlock(&lock_file)?;
        Ok(registry)
    }

    pub fn load(&self) -> HsyncResult<Registry> {
        self.load_from_disk()
    }

    /// Read `root/.cast/config.yaml` and register that cast by its
    /// `cast_name`. Fails with `NotACast` when the config is missing or
    /// invalid.
    pub fn register_cast(&self, root: PathBuf) -> HsyncResult<CastConfig> {
        let config = CastConfig::load(&root)?;
        self.update(|r| r.upsert_cast(config.cast_name.clone(), root.clone()))?;
        Ok(config)
    }

    pub fn register_codebase(&self, name: impl Into<String>, root: PathBuf) -> HsyncResult<()> {
        let name = name.into();
        self.update(|r| r.upsert_codebase(name.clone(), root.clone()))?;
        Ok(())
    }

    pub fn resolve_cast(&self, name: &str) -> HsyncResult<PathBuf> {
        let registry = self.load()?;
        registry
            .cast_root(name)
            .map(Path::to_path_buf)
            .ok_or_else(|| HsyncError::NotRegistered {
                name: name.to_string(),
            })
    }

    pub fn resolve_codebase(&self, name: &str) -> HsyncResult<PathBuf> {
        let registry = self.load()?;
        registry
            .codebase_root(name)
            .map(Path::to_path_buf)
            .ok_or_else(|| HsyncError::NotRegistered {
                name: name.to_string(),
            })
    }

    pub fn list_casts(&self) -> HsyncResult<BTreeMap<String, RegistryEntry>> {
        Ok(self.load()?.casts)
    }

    pub fn list_codebases(&self) -> HsyncResult<BTreeMap<String, RegistryEntry>> {
        Ok(self.load()?.codebases)
    }

    /// Remove `name` from either namespace. Fails with `NotRegistered` if
    /// present in neither.
    pub fn uninstall(&self, name: &str) -> HsyncResult<()> {
        let mut found = false;
        self.update(|r| {
            if r.remove_cast(name).is_some() {
                found = true;
            }
            if r.remove_codebase(name).is_some() {
                found = true;
            }
        })?;
        if found {
            Ok(())
        } else {
            Err(HsyncError::NotRegistered {
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_empty() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().to_path_buf());
        let registry = store.load().unwrap();
        assert!(registry.casts.is_empty());
    }

    #[test]
    fn update_is_upsert_and_persists() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().to_path_buf());
        store
            .update(|r| r.upsert_cast("Alpha", PathBuf::from("/tmp/alpha")))
            .unwrap();
        let registry = store.load().unwrap();
        assert_eq!(registry.cast_root("Alpha"), Some(Path::new("/tmp/alpha")));
    }

    #[test]
    fn remove_cast_drops_entry() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().to_path_buf());
        store
            .update(|r| r.upsert_cast("Alpha", PathBuf::from("/tmp/alpha")))
            .unwrap();
        store.update(|r| { r.remove_cast("Alpha"); }).unwrap();
        let registry = store.load().unwrap();
        assert!(registry.cast_root("Alpha").is_none());
    }

    #[test]
    fn load_corrupted_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(REGISTRY_FILE), "not = [valid toml").unwrap();
        let store = RegistryStore::new(dir.path().to_path_buf());
        assert!(store.load().is_err());
    }

    #[test]
    fn register_cast_reads_config_and_resolves_by_name() {
        let home = tempdir().unwrap();
        let cast_root = tempdir().unwrap();
        CastConfig::new("Alpha").save(cast_root.path()).unwrap();

        let store = RegistryStore::new(home.path().to_path_buf());
        let config = store.register_cast(cast_root.path().to_path_buf()).unwrap();
        assert_eq!(config.cast_name, "Alpha");

        let resolved = store.resolve_cast("Alpha").unwrap();
        assert_eq!(resolved, cast_root.path());
    }

    #[test]
    fn register_cast_fails_when_not_a_cast() {
        let home = tempdir().unwrap();
        let not_a_cast = tempdir().unwrap();
        let store = RegistryStore::new(home.path().to_path_buf());
        let err = store
            .register_cast(not_a_cast.path().to_path_buf())
            .unwrap_err();
        assert!(matches!(err, HsyncError::NotACast { .. }));
    }

    #[test]
    fn resolve_unregistered_name_errors() {
        let home = tempdir().unwrap();
        let store = RegistryStore::new(home.path().to_path_buf());
        let err = store.resolve_cast("Ghost").unwrap_err();
        assert!(matches!(err, HsyncError::NotRegistered { .. }));
    }

    #[test]
    fn uninstall_removes_from_either_namespace() {
        let home = tempdir().unwrap();
        let store = RegistryStore::new(home.path().to_path_buf());
        store
            .update(|r| r.upsert_codebase("core", PathBuf::from("/tmp/core")))
            .unwrap();
        store.uninstall("core").unwrap();
        assert!(store.resolve_codebase("core").is_err());
    }

    #[test]
    fn uninstall_unknown_name_errors() {
        let home = tempdir().unwrap();
        let store = RegistryStore::new(home.path().to_path_buf());
        let err = store.uninstall("Ghost").unwrap_err();
        assert!(matches!(err, HsyncError::NotRegistered { .. }));
    }
}
