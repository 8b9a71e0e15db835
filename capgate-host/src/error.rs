//! Error taxonomy for compile-time and runtime access control
//!
//! | Error | Raised by | Catchable by scripts |
//! |-------|-----------|----------------------|
//! | [`CompileError`] | analyzer, codegen adapter | never reaches runtime |
//! | [`SecurityError`] | runtime validator | no, aborts the script |
//! | [`CapabilityError`] | capability checks | yes |
//!
//! A missing attribute on a registered-safe member is not an error: the
//! dynamic fetch returns the caller's default instead.

use crate::ast::{NodeId, Span};
use crate::context::ContextId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a call or attribute access was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Introspection/reflection name (dunder, private, or known reflection builtin)
    ReflectionPattern,
    /// Registered as `Forbidden`
    ForbiddenAttribute,
    /// No whitelist entry for the attribute
    UnregisteredAttribute,
    /// Not a builtin, user function, or imported export
    UnregisteredFunction,
    /// Module absent from the registry or not imported
    UnknownModule,
    /// Module exists but does not export the member
    NotExported,
    /// Callee is an arbitrary expression; use the guarded `call` builtin
    IndirectCall,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ReflectionPattern => "reflection pattern",
            Self::ForbiddenAttribute => "forbidden attribute",
            Self::UnregisteredAttribute => "unregistered attribute",
            Self::UnregisteredFunction => "unregistered function",
            Self::UnknownModule => "unknown module",
            Self::NotExported => "not exported by module",
            Self::IndirectCall => "indirect call",
        };
        f.write_str(text)
    }
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!("; did you mean: {}?", suggestions.join(", "))
    }
}

/// Unresolvable call or attribute at build time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} `{symbol}` at node {node} ({span}){}", suggestion_hint(.suggestions))]
pub struct CompileError {
    pub node: NodeId,
    pub span: Span,
    pub symbol: String,
    pub reason: RejectReason,
    /// Up to three close names from the registry
    pub suggestions: Vec<String>,
}

impl CompileError {
    pub fn new(node: NodeId, span: Span, symbol: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            node,
            span,
            symbol: symbol.into(),
            reason,
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// Whitelist violation on a dynamic path. Fatal to the running script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("security violation: {reason} `{symbol}`")]
pub struct SecurityError {
    pub symbol: String,
    pub reason: RejectReason,
}

impl SecurityError {
    pub fn new(symbol: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            symbol: symbol.into(),
            reason,
        }
    }
}

/// Operation attempted without a required, currently valid token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability '{0}' is not granted")]
    Missing(String),

    #[error("capability '{0}' has expired")]
    Expired(String),

    #[error("capability '{capability}' exhausted after {max_usage} uses")]
    Exhausted { capability: String, max_usage: u64 },

    #[error("capability '{capability}' does not cover resource '{resource}'")]
    ResourceDenied {
        capability: String,
        resource: String,
    },

    #[error("capability '{capability}' does not allow operation '{operation}'")]
    OperationDenied {
        capability: String,
        operation: String,
    },
}

impl CapabilityError {
    /// The capability type the failure concerns
    pub fn capability(&self) -> &str {
        match self {
            Self::Missing(c) | Self::Expired(c) => c,
            Self::Exhausted { capability, .. }
            | Self::ResourceDenied { capability, .. }
            | Self::OperationDenied { capability, .. } => capability,
        }
    }
}

/// Errors surfaced to the host while running generated code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("'{type_name}' value is not callable")]
    NotCallable { type_name: String },

    #[error("call depth limit of {0} exceeded")]
    DepthExceeded(usize),

    #[error("{0}")]
    Runtime(String),
}

impl ScriptError {
    /// Only permission gaps may be handled by the script's own error handling
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Capability(_))
    }

    /// Check if this is a security-related error
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Security(_))
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Host-side misuse of context handles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context {0} no longer exists")]
    Stale(ContextId),
}
