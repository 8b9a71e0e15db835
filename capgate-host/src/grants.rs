//! Persistent root grants
//!
//! A [`GrantManifest`] lists the tokens a host grants to the root context of
//! a sandbox. Stores load and save manifests; the sandbox builder reads them
//! once at construction.
//!
//! ```json
//! {
//!   "version": 1,
//!   "grants": [
//!     { "capability_type": "file.read",
//!       "constraints": { "resource_patterns": ["*.txt"], "max_usage_count": 2 } }
//!   ]
//! }
//! ```

use capgate_api::CapabilityToken;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum GrantStoreError {
    #[error("Failed to read grant store: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse grant store: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unsupported grant manifest version {0}")]
    UnsupportedVersion(u32),

    #[error("Store is read-only")]
    ReadOnly,
}

/// Root grants of one sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantManifest {
    pub version: u32,
    #[serde(default)]
    pub grants: Vec<CapabilityToken>,
}

impl Default for GrantManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            grants: Vec::new(),
        }
    }
}

impl GrantManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the grant with this token's type
    pub fn grant(&mut self, token: CapabilityToken) {
        self.revoke(&token.capability_type);
        self.grants.push(token);
    }

    /// Remove the grant of a type; true if one existed
    pub fn revoke(&mut self, capability_type: &str) -> bool {
        let before = self.grants.len();
        self.grants.retain(|t| t.capability_type != capability_type);
        before != self.grants.len()
    }

    pub fn get(&self, capability_type: &str) -> Option<&CapabilityToken> {
        self.grants
            .iter()
            .find(|t| t.capability_type == capability_type)
    }

    fn check_version(self) -> Result<Self, GrantStoreError> {
        if self.version > MANIFEST_VERSION {
            return Err(GrantStoreError::UnsupportedVersion(self.version));
        }
        Ok(self)
    }
}

pub trait GrantStore: Send + Sync {
    fn load(&self) -> Result<GrantManifest, GrantStoreError>;

    fn save(&self, manifest: &GrantManifest) -> Result<(), GrantStoreError>;

    fn grant(&self, token: CapabilityToken) -> Result<(), GrantStoreError> {
        let mut manifest = self.load()?;
        manifest.grant(token);
        self.save(&manifest)
    }

    fn revoke(&self, capability_type: &str) -> Result<bool, GrantStoreError> {
        let mut manifest = self.load()?;
        let removed = manifest.revoke(capability_type);
        if removed {
            self.save(&manifest)?;
        }
        Ok(removed)
    }
}

// ============================================================================
// File-based Grant Store
// ============================================================================

/// JSON file store, default `~/.config/<app>/grants.json`
pub struct FileGrantStore {
    path: PathBuf,
    data: RwLock<GrantManifest>,
}

impl FileGrantStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, GrantStoreError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader::<_, GrantManifest>(reader)?.check_version()?
        } else {
            GrantManifest::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn default_for_app(app_name: &str) -> Result<Self, GrantStoreError> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::new(config_dir.join(app_name).join("grants.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, manifest: &GrantManifest) -> Result<(), GrantStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, manifest)?;
        Ok(())
    }
}

impl GrantStore for FileGrantStore {
    fn load(&self) -> Result<GrantManifest, GrantStoreError> {
        Ok(self.data.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, manifest: &GrantManifest) -> Result<(), GrantStoreError> {
        self.write_file(manifest)?;
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = manifest.clone();
        tracing::debug!(
            path = %self.path.display(),
            grants = manifest.grants.len(),
            "Grant manifest saved"
        );
        Ok(())
    }
}

impl std::fmt::Debug for FileGrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGrantStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// In-Memory Grant Store
// ============================================================================

#[derive(Default)]
pub struct MemoryGrantStore {
    data: RwLock<GrantManifest>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(manifest: GrantManifest) -> Self {
        Self {
            data: RwLock::new(manifest),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GrantStore for MemoryGrantStore {
    fn load(&self) -> Result<GrantManifest, GrantStoreError> {
        Ok(self.data.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, manifest: &GrantManifest) -> Result<(), GrantStoreError> {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = manifest.clone();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryGrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGrantStore")
            .field("count", &self.len())
            .finish()
    }
}

// ============================================================================
// Read-Only Grant Store
// ============================================================================

/// Read-only wrapper, for deployments where grants are provisioned ahead
/// of time
pub struct ReadOnlyGrantStore<S: GrantStore> {
    inner: S,
}

impl<S: GrantStore> ReadOnlyGrantStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: GrantStore> GrantStore for ReadOnlyGrantStore<S> {
    fn load(&self) -> Result<GrantManifest, GrantStoreError> {
        self.inner.load()
    }

    fn save(&self, _manifest: &GrantManifest) -> Result<(), GrantStoreError> {
        Err(GrantStoreError::ReadOnly)
    }
}

impl<S: GrantStore + std::fmt::Debug> std::fmt::Debug for ReadOnlyGrantStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyGrantStore")
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgate_api::Constraints;

    fn file_read() -> CapabilityToken {
        CapabilityToken::new("file.read").with_constraints(
            Constraints::new()
                .with_resource_patterns(["*.txt"])
                .with_max_usage(2),
        )
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryGrantStore::new();
        store.grant(file_read()).unwrap();
        store.grant(CapabilityToken::new("net.http")).unwrap();
        assert_eq!(store.len(), 2);

        assert!(store.revoke("net.http").unwrap());
        assert!(!store.revoke("net.http").unwrap());
        assert_eq!(store.load().unwrap().grants, vec![file_read()]);
    }

    #[test]
    fn test_grant_replaces_same_type() {
        let mut manifest = GrantManifest::new();
        manifest.grant(file_read());
        manifest.grant(CapabilityToken::new("file.read"));

        assert_eq!(manifest.grants.len(), 1);
        assert!(manifest.get("file.read").unwrap().constraints.is_none());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app").join("grants.json");

        let store = FileGrantStore::new(&path).unwrap();
        store.grant(file_read()).unwrap();
        assert!(path.exists());

        let reopened = FileGrantStore::new(&path).unwrap();
        let manifest = reopened.load().unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.get("file.read"), Some(&file_read()));
    }

    #[test]
    fn test_file_store_rejects_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");
        std::fs::write(&path, r#"{"version": 99, "grants": []}"#).unwrap();

        assert!(matches!(
            FileGrantStore::new(&path),
            Err(GrantStoreError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_read_only_store() {
        let inner = MemoryGrantStore::new();
        inner.grant(CapabilityToken::new("net.http")).unwrap();
        let store = ReadOnlyGrantStore::new(inner);

        assert_eq!(store.load().unwrap().grants.len(), 1);
        assert!(matches!(
            store.grant(file_read()),
            Err(GrantStoreError::ReadOnly)
        ));
    }
}
