//! capgate-host: Capability-gated access control for embedded scripts
//!
//! This crate guards untrusted scripts a host application runs. It closes
//! two attack surfaces with one decision function:
//!
//! - **Static**: the [`analyzer`] and the [`codegen`] adapter resolve every
//!   call and attribute node against an immutable, default-deny
//!   [`AccessRegistry`] before any code is emitted.
//! - **Dynamic**: the [`RuntimeValidator`] re-derives the permission of
//!   every callable value and runtime-named attribute, so storing a
//!   function in a variable or passing it to `call` grants nothing the
//!   direct call would not.
//!
//! Capability tokens live in a tree of contexts owned by a [`Sandbox`].
//! Grants flow downward only; nested scopes are popped and destroyed when
//! their [`ScopeGuard`] drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use capgate_host::{CodegenAdapter, RegistryPresets, Sandbox};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(RegistryPresets::standard());
//! let compiled = CodegenAdapter::new("main", Arc::clone(&registry)).compile(&program)?;
//!
//! let mut sandbox = Sandbox::new("main", registry);
//! sandbox.grant(CapabilityToken::new("file.read"));
//! let validator = compiled.runtime_validator();
//! ```

pub mod analyzer;
pub mod ast;
pub mod audit;
pub mod codegen;
pub mod context;
pub mod decision;
pub mod error;
pub mod grants;
pub mod introspection;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod suggest;
pub mod unit;
mod walk;

#[cfg(feature = "subscriber")]
pub mod tracing_support;

pub use analyzer::{AnalysisReport, NodeOutcome, StaticAnalyzer, Verdict};
pub use ast::{Expr, ExprKind, Literal, NodeId, Program, Site, Span, Stmt, StmtKind};
pub use audit::{
    AuditError, AuditEvent, AuditEventType, AuditSink, CompositeAuditSink, FileAuditSink,
    MemoryAuditSink, NullAuditSink,
};
pub use codegen::{
    AttributeResolution, CallResolution, CodegenAdapter, CompiledProgram, Emission,
    ImportResolution, NameResolution,
};
pub use context::{AccessRequest, CapabilitySource, ContextArena, ContextId};
pub use decision::{AttributeDecision, CallTarget};
pub use error::{
    CapabilityError, CompileError, ContextError, RejectReason, ScriptError, SecurityError,
};
pub use grants::{
    FileGrantStore, GrantManifest, GrantStore, GrantStoreError, MemoryGrantStore,
    ReadOnlyGrantStore,
};
pub use introspection::Introspection;
pub use registry::{AccessRegistry, RegistryBuilder, RegistryPresets};
pub use runtime::{
    CallableIdentity, CallableRef, Dispatcher, HostObject, RuntimeValidator, Value,
};
pub use sandbox::{
    PresetError, Sandbox, SandboxBuilder, SandboxConfig, SandboxPresets, ScopeGuard,
};
pub use unit::{CompilationUnit, ProgramSymbols};

pub use capgate_api::{
    AccessKind, CapabilityToken, Constraints, FunctionOrigin, SafeAttribute, SafeFunction,
    ScopeId, TokenInfo,
};
