//! Sandbox session: one context tree and its current-context stack
//!
//! A [`Sandbox`] is what a host creates per script execution. It owns the
//! root context, a stack whose top is the *current* context, and shared
//! read-only references to the access registry and the audit sink.
//!
//! ```text
//!   stack: [root, fn_call, nested]
//!                           ^ current
//!
//!   enter_scope()  -> push child of current, returns ScopeGuard
//!   drop(guard)    -> pop + destroy child (also on `?` and panics)
//! ```
//!
//! Independent sandboxes share nothing mutable and may run on different
//! threads at the same time.

mod presets;

pub use presets::{PresetError, SandboxBuilder, SandboxConfig, SandboxPresets};

use crate::audit::{self, AuditEvent, AuditSink, NullAuditSink};
use crate::context::{AccessRequest, CapabilitySource, ContextArena, ContextId};
use crate::error::{CapabilityError, ContextError};
use crate::registry::AccessRegistry;
use capgate_api::{CapabilityToken, TokenInfo};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub struct Sandbox {
    name: String,
    arena: ContextArena,
    root: ContextId,
    stack: Vec<ContextId>,
    registry: Arc<AccessRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl Sandbox {
    pub fn new(name: impl Into<String>, registry: Arc<AccessRegistry>) -> Self {
        let mut arena = ContextArena::new();
        let root = arena.create_root("root");
        Self {
            name: name.into(),
            arena,
            root,
            stack: vec![root],
            registry,
            audit: Arc::new(NullAuditSink::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn builder(name: impl Into<String>) -> SandboxBuilder {
        SandboxBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &AccessRegistry {
        &self.registry
    }

    pub fn registry_arc(&self) -> Arc<AccessRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn arena(&self) -> &ContextArena {
        &self.arena
    }

    pub fn root(&self) -> ContextId {
        self.root
    }

    /// The context sandboxed code currently runs in
    pub fn current(&self) -> ContextId {
        self.stack.last().copied().unwrap_or(self.root)
    }

    /// Number of scopes entered above the root
    pub fn depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    fn label(&self, ctx: ContextId) -> String {
        self.arena.label(ctx).unwrap_or("?").to_string()
    }

    pub(crate) fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(sandbox = %self.name, error = %e, "Failed to record audit event");
        }
    }

    // ------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------

    /// Grant a token to the root context
    pub fn grant(&mut self, token: CapabilityToken) -> Option<CapabilityToken> {
        let root = self.root;
        self.grant_to(root, token).unwrap_or_default()
    }

    /// Grant a token to the current context only
    pub fn grant_current(&mut self, token: CapabilityToken) -> Option<CapabilityToken> {
        let current = self.current();
        self.grant_to(current, token).unwrap_or_default()
    }

    pub fn grant_to(
        &mut self,
        ctx: ContextId,
        token: CapabilityToken,
    ) -> Result<Option<CapabilityToken>, ContextError> {
        let event = audit::capability_granted(&self.name, &token).with_context(self.label(ctx));
        tracing::info!(
            sandbox = %self.name,
            context = %ctx,
            capability = %token.capability_type,
            fingerprint = %token.fingerprint(),
            "Capability granted"
        );
        let previous = self.arena.add_capability(ctx, token)?;
        self.record(event);
        Ok(previous)
    }

    /// Revoke a capability from the root context
    pub fn revoke(&mut self, capability_type: &str) -> Option<CapabilityToken> {
        let root = self.root;
        self.revoke_from(root, capability_type)
    }

    pub fn revoke_from(&mut self, ctx: ContextId, capability_type: &str) -> Option<CapabilityToken> {
        let removed = self.arena.remove_capability(ctx, capability_type);
        if removed.is_some() {
            tracing::info!(
                sandbox = %self.name,
                context = %ctx,
                capability = capability_type,
                "Capability revoked"
            );
            self.record(
                audit::capability_revoked(&self.name, capability_type).with_context(self.label(ctx)),
            );
        }
        removed
    }

    // ------------------------------------------------------------------
    // Queries (current context, ancestors included)
    // ------------------------------------------------------------------

    pub fn has_capability(&self, capability_type: &str) -> bool {
        self.arena.has_capability(self.current(), capability_type, true)
    }

    /// Sorted capability types held by the current context
    pub fn capabilities(&self) -> Vec<String> {
        self.arena
            .get_all_capabilities(self.current(), true)
            .into_iter()
            .collect()
    }

    pub fn capability_info(&self, capability_type: &str) -> Option<TokenInfo> {
        self.arena.get_capability_info(self.current(), capability_type)
    }

    /// Like [`capability_info`](Self::capability_info), but also reports a
    /// spent or expired token as unavailable
    pub fn describe_capability(&self, capability_type: &str) -> Option<TokenInfo> {
        self.arena.describe_capability(self.current(), capability_type)
    }

    /// Check that a capability is held without consuming a use
    pub fn require(&self, capability_type: &str) -> Result<(), CapabilityError> {
        if self.has_capability(capability_type) {
            return Ok(());
        }
        let err = match self.describe_capability(capability_type) {
            Some(info) if info.expires_at.is_some_and(|at| at <= chrono::Utc::now()) => {
                CapabilityError::Expired(capability_type.to_string())
            }
            Some(info) => CapabilityError::Exhausted {
                capability: capability_type.to_string(),
                max_usage: info.max_usage.unwrap_or_default(),
            },
            None => CapabilityError::Missing(capability_type.to_string()),
        };
        tracing::warn!(sandbox = %self.name, capability = capability_type, error = %err, "Capability check failed");
        Err(err)
    }

    /// Authorize one operation from the current context, counting one use
    pub fn authorize(&mut self, request: &AccessRequest) -> Result<TokenInfo, CapabilityError> {
        let current = self.current();
        match self.arena.authorize(current, request) {
            Ok(info) => {
                tracing::trace!(
                    sandbox = %self.name,
                    capability = %request.capability_type,
                    resource = ?request.resource,
                    usage_count = info.usage_count,
                    "Capability used"
                );
                self.record(audit::capability_used(&self.name, request).with_context(self.label(current)));
                Ok(info)
            }
            Err(err) => {
                tracing::warn!(
                    sandbox = %self.name,
                    capability = %request.capability_type,
                    resource = ?request.resource,
                    error = %err,
                    "Capability denied"
                );
                self.record(
                    audit::capability_denied(&self.name, request, &err).with_context(self.label(current)),
                );
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Push a child of the current context; it is popped and destroyed when
    /// the guard drops
    pub fn enter_scope(&mut self, label: impl Into<String>) -> Result<ScopeGuard<'_>, ContextError> {
        let label = label.into();
        let child = self.arena.create_child(self.current(), label.clone())?;
        self.stack.push(child);
        let depth = self.depth();
        tracing::debug!(sandbox = %self.name, context = %child, label = %label, depth, "Scope entered");
        self.record(audit::scope_entered(&self.name, &label, depth));
        Ok(ScopeGuard {
            sandbox: self,
            ctx: child,
        })
    }

    /// Run `f` inside a fresh child scope
    pub fn with_scope<R>(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce(&mut Sandbox) -> R,
    ) -> Result<R, ContextError> {
        let mut guard = self.enter_scope(label)?;
        Ok(f(&mut guard))
    }

    fn exit_scope(&mut self, ctx: ContextId) {
        let depth = self.depth();
        let label = self.label(ctx);
        if let Some(pos) = self.stack.iter().rposition(|c| *c == ctx) {
            self.stack.truncate(pos);
        }
        let destroyed = self.arena.destroy(ctx);
        tracing::debug!(sandbox = %self.name, context = %ctx, label = %label, destroyed, "Scope exited");
        self.record(audit::scope_exited(&self.name, &label, depth));
    }
}

impl CapabilitySource for Sandbox {
    fn has_capability(&self, capability_type: &str) -> bool {
        Sandbox::has_capability(self, capability_type)
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("name", &self.name)
            .field("current", &self.current())
            .field("depth", &self.depth())
            .field("contexts", &self.arena.len())
            .finish_non_exhaustive()
    }
}

/// A scope entered with [`Sandbox::enter_scope`]
pub struct ScopeGuard<'a> {
    sandbox: &'a mut Sandbox,
    ctx: ContextId,
}

impl ScopeGuard<'_> {
    pub fn context(&self) -> ContextId {
        self.ctx
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Sandbox;

    fn deref(&self) -> &Sandbox {
        self.sandbox
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Sandbox {
        self.sandbox
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.sandbox.exit_scope(self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, MemoryAuditSink};
    use crate::registry::RegistryPresets;
    use capgate_api::Constraints;

    fn sandbox() -> Sandbox {
        Sandbox::new("test", Arc::new(RegistryPresets::standard()))
    }

    #[test]
    fn test_scope_guard_pops_and_destroys() {
        let mut sb = sandbox();
        sb.grant(CapabilityToken::new("net.http"));
        let root = sb.root();

        let child = {
            let mut scope = sb.enter_scope("call").unwrap();
            scope.grant_current(CapabilityToken::new("file.read"));
            assert!(scope.has_capability("net.http"));
            assert!(scope.has_capability("file.read"));
            assert_eq!(scope.depth(), 1);
            scope.context()
        };

        assert_eq!(sb.current(), root);
        assert!(!sb.arena().contains(child));
        assert!(!sb.has_capability("file.read"));
        assert!(sb.has_capability("net.http"));
    }

    #[test]
    fn test_nested_scopes_close_inside_out() {
        let mut sb = sandbox();
        {
            let mut outer = sb.enter_scope("outer").unwrap();
            {
                let inner = outer.enter_scope("inner").unwrap();
                assert_eq!(inner.depth(), 2);
            }
            assert_eq!(outer.depth(), 1);
        }
        assert_eq!(sb.depth(), 0);
        assert_eq!(sb.arena().len(), 1);
    }

    #[test]
    fn test_scope_released_on_error_path() {
        fn failing(sb: &mut Sandbox) -> Result<(), CapabilityError> {
            let scope = sb.enter_scope("failing").unwrap();
            scope.require("net.http")?;
            Ok(())
        }

        let mut sb = sandbox();
        assert!(failing(&mut sb).is_err());
        assert_eq!(sb.depth(), 0);
    }

    #[test]
    fn test_with_scope() {
        let mut sb = sandbox();
        let seen = sb
            .with_scope("closure", |inner| {
                inner.grant_current(CapabilityToken::new("net.http"));
                inner.has_capability("net.http")
            })
            .unwrap();
        assert!(seen);
        assert!(!sb.has_capability("net.http"));
    }

    #[test]
    fn test_authorize_is_audited() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut sb = sandbox().with_audit(audit.clone());
        sb.grant(CapabilityToken::new("file.read").with_constraints(Constraints::new().with_max_usage(1)));

        let request = AccessRequest::new("file.read");
        assert!(sb.authorize(&request).is_ok());
        assert!(sb.authorize(&request).is_err());

        assert_eq!(audit.find_by_type(AuditEventType::CapabilityGranted).len(), 1);
        assert_eq!(audit.find_by_type(AuditEventType::CapabilityUsed).len(), 1);
        assert_eq!(audit.find_by_type(AuditEventType::CapabilityDenied).len(), 1);
    }

    #[test]
    fn test_require_reports_exhaustion() {
        let mut sb = sandbox();
        sb.grant(CapabilityToken::new("file.read").with_constraints(Constraints::new().with_max_usage(1)));
        assert!(sb.require("file.read").is_ok());
        sb.authorize(&AccessRequest::new("file.read")).unwrap();

        assert_eq!(
            sb.require("file.read"),
            Err(CapabilityError::Exhausted {
                capability: "file.read".into(),
                max_usage: 1
            })
        );
        assert_eq!(
            sb.require("net.http"),
            Err(CapabilityError::Missing("net.http".into()))
        );
    }

    #[test]
    fn test_require_reports_expiry() {
        let mut sb = sandbox();
        let expired = CapabilityToken::new("net.http").with_constraints(
            Constraints::new().with_expiry(chrono::Utc::now() - chrono::Duration::seconds(1)),
        );
        sb.grant(expired);

        assert_eq!(
            sb.require("net.http"),
            Err(CapabilityError::Expired("net.http".into()))
        );
        assert!(!sb.has_capability("net.http"));
        assert_eq!(sb.describe_capability("net.http").map(|i| i.usage_count), Some(0));
    }

    #[test]
    fn test_revoke() {
        let mut sb = sandbox();
        sb.grant(CapabilityToken::new("net.http"));
        assert!(sb.revoke("net.http").is_some());
        assert!(sb.revoke("net.http").is_none());
        assert!(sb.capabilities().is_empty());
    }
}
