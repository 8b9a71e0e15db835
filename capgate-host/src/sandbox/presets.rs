//! Pre-configured sandbox setups
//!
//! Ready-made configurations hosts can use directly or as a starting point.

use super::Sandbox;
use crate::audit::{AuditError, AuditSink, FileAuditSink, MemoryAuditSink};
use crate::grants::{FileGrantStore, GrantManifest, GrantStore, GrantStoreError};
use crate::registry::{AccessRegistry, RegistryPresets};
use capgate_api::CapabilityToken;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error(transparent)]
    Store(#[from] GrantStoreError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Everything needed to open a sandbox
pub struct SandboxConfig {
    pub name: String,
    pub registry: Arc<AccessRegistry>,
    pub audit: Arc<dyn AuditSink>,
    /// Grants installed on the root context
    pub grants: GrantManifest,
}

impl std::fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("name", &self.name)
            .field("grants", &self.grants.grants.len())
            .finish_non_exhaustive()
    }
}

impl SandboxConfig {
    pub fn into_sandbox(self) -> Sandbox {
        let mut sandbox = Sandbox::new(self.name, self.registry).with_audit(self.audit);
        for token in self.grants.grants {
            sandbox.grant(token);
        }
        sandbox
    }
}

pub struct SandboxBuilder {
    name: String,
    registry: Option<Arc<AccessRegistry>>,
    audit: Option<Arc<dyn AuditSink>>,
    grants: GrantManifest,
}

impl SandboxBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: None,
            audit: None,
            grants: GrantManifest::new(),
        }
    }

    /// Shared registry; defaults to [`RegistryPresets::standard`]
    pub fn registry(mut self, registry: Arc<AccessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn audit_arc(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn grant(mut self, token: CapabilityToken) -> Self {
        self.grants.grant(token);
        self
    }

    /// Add every grant from a store
    pub fn grants_from(mut self, store: &dyn GrantStore) -> Result<Self, GrantStoreError> {
        for token in store.load()?.grants {
            self.grants.grant(token);
        }
        Ok(self)
    }

    pub fn build_config(self) -> SandboxConfig {
        SandboxConfig {
            name: self.name,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(RegistryPresets::standard())),
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(crate::audit::NullAuditSink::new())),
            grants: self.grants,
        }
    }

    pub fn build(self) -> Sandbox {
        self.build_config().into_sandbox()
    }
}

pub struct SandboxPresets;

impl SandboxPresets {
    /// Standard registry, no grants, in-memory audit
    pub fn testing() -> SandboxConfig {
        SandboxBuilder::new("testing")
            .audit(MemoryAuditSink::new())
            .build_config()
    }

    /// Grants from `<config>/<app>/grants.json`, audit to
    /// `<config>/<app>/audit.jsonl`
    pub fn for_app(app_name: &str, registry: Arc<AccessRegistry>) -> Result<SandboxConfig, PresetError> {
        let store = FileGrantStore::default_for_app(app_name)?;
        let audit = FileAuditSink::new(app_dir(app_name).join("audit.jsonl"))?;
        Ok(SandboxBuilder::new(app_name)
            .registry(registry)
            .audit(audit)
            .grants_from(&store)?
            .build_config())
    }
}

fn app_dir(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(app_name)
}
