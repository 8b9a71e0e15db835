//! Code generator adapter
//!
//! The external code generator resolves every call, attribute and import
//! node through this adapter. Each entry point is total: it returns an
//! emission decision or a [`CompileError`], never an implicit allow.
//!
//! The adapter writes only to its own [`CompilationUnit`]. The shared
//! [`AccessRegistry`] is read, never extended.

use crate::analyzer::StaticAnalyzer;
use crate::ast::{Expr, ExprKind, NodeId, Program, Site};
use crate::audit::{self, AuditSink, NullAuditSink};
use crate::decision::{self, AttributeDecision, CallTarget};
use crate::error::{CompileError, RejectReason};
use crate::registry::{is_reflection_name, AccessRegistry};
use crate::runtime::{CallableIdentity, RuntimeValidator};
use crate::suggest::did_you_mean;
use crate::unit::{CompilationUnit, ProgramSymbols};
use crate::walk::{walk_program, Visitor};
use capgate_api::{SafeAttribute, ScopeId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// How a call node is emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResolution {
    Builtin { name: String },
    User { scope: ScopeId, name: String },
    Module { module: String, name: String },
    /// `object.name(...)`
    Method(AttributeResolution),
}

impl From<CallTarget> for CallResolution {
    fn from(target: CallTarget) -> Self {
        match target {
            CallTarget::Builtin { name } => Self::Builtin { name },
            CallTarget::User { scope, name } => Self::User { scope, name },
            CallTarget::Module { module, name } => Self::Module { module, name },
            CallTarget::Method { type_name, name } => Self::Method(AttributeResolution::Direct {
                type_name,
                attribute: SafeAttribute::method(name, ""),
            }),
        }
    }
}

/// How an attribute node is emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeResolution {
    /// Plain member access on a statically known type
    Direct {
        type_name: String,
        attribute: SafeAttribute,
    },
    /// Rewritten to `builtin(object)`
    MappedCall { builtin: String },
    /// Type unknown statically; routed through the runtime validator
    RuntimeGuarded { name: String },
    /// `alias.export` on an imported module
    ModuleMember { module: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportResolution {
    Added,
}

/// What a bare name refers to when used as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    /// Emitted as a callable value carrying this identity
    Function(CallableIdentity),
    Module(String),
    Variable,
}

/// Emission decision recorded for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Call(CallResolution),
    Attribute(AttributeResolution),
    Reference(NameResolution),
    Import(ImportResolution),
    /// `getattr`-style fetch, always runtime guarded
    DynamicAttribute,
}

/// Output of a successful compilation
///
/// The plan says how each node was resolved; it grants nothing by itself.
/// Generated code executes every planned call through
/// [`RuntimeValidator::call_resolved`] and every planned attribute read
/// through [`RuntimeValidator::get_resolved`], so capability requirements
/// are checked against the live sandbox exactly as on the dynamic paths.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub registry: Arc<AccessRegistry>,
    pub symbols: Arc<ProgramSymbols>,
    pub plan: BTreeMap<NodeId, Emission>,
}

impl CompiledProgram {
    pub fn emission(&self, node: NodeId) -> Option<&Emission> {
        self.plan.get(&node)
    }

    /// Validator bound to this program's symbols
    pub fn runtime_validator(&self) -> RuntimeValidator {
        RuntimeValidator::new(Arc::clone(&self.registry), Arc::clone(&self.symbols))
    }

    /// The call resolution planned for `node`, if it is a call node
    pub fn call_at(&self, node: NodeId) -> Option<&CallResolution> {
        match self.plan.get(&node) {
            Some(Emission::Call(resolution)) => Some(resolution),
            _ => None,
        }
    }
}

pub struct CodegenAdapter {
    name: String,
    unit: CompilationUnit,
    locals: HashSet<(ScopeId, String)>,
    audit: Arc<dyn AuditSink>,
}

impl CodegenAdapter {
    pub fn new(name: impl Into<String>, registry: Arc<AccessRegistry>) -> Self {
        Self {
            name: name.into(),
            unit: CompilationUnit::new(registry),
            locals: HashSet::new(),
            audit: Arc::new(NullAuditSink::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &CompilationUnit {
        &self.unit
    }

    fn reject(&self, site: Site, symbol: &str, reason: RejectReason, suggestions: Vec<String>) -> CompileError {
        let err = CompileError::new(site.node, site.span, symbol, reason).with_suggestions(suggestions);
        self.report(&err);
        err
    }

    fn report(&self, err: &CompileError) {
        tracing::warn!(
            unit = %self.name,
            node = %err.node,
            symbol = %err.symbol,
            reason = %err.reason,
            suggestions = ?err.suggestions,
            "Compile rejected"
        );
        if let Err(e) = self.audit.record(audit::compile_rejected(&self.name, err)) {
            tracing::warn!(unit = %self.name, error = %e, "Failed to record audit event");
        }
    }

    fn function_suggestions(&self, scope: ScopeId, name: &str) -> Vec<String> {
        let registry = self.unit.registry();
        let mut candidates: Vec<&str> = registry.builtin_names().collect();
        candidates.extend(self.unit.symbols().visible_functions(scope));
        did_you_mean(name, candidates)
    }

    fn is_local(&self, scope: ScopeId, name: &str) -> bool {
        let symbols = self.unit.symbols();
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.locals.contains(&(id, name.to_string())) {
                return true;
            }
            current = symbols.parent(id);
        }
        false
    }

    // ------------------------------------------------------------------
    // Unit bookkeeping
    // ------------------------------------------------------------------

    pub fn open_scope(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        self.unit.symbols_mut().open_scope(parent, name)
    }

    pub fn define_function(&mut self, scope: ScopeId, site: Site, name: &str) -> Result<(), CompileError> {
        self.unit
            .symbols_mut()
            .define_function(scope, name)
            .map_err(|reason| self.reject(site, name, reason, Vec::new()))
    }

    /// Declare a variable or parameter; its reads stay unchecked until used
    /// as a callable or attribute target
    pub fn declare_local(&mut self, scope: ScopeId, site: Site, name: &str) -> Result<(), CompileError> {
        if is_reflection_name(name) {
            return Err(self.reject(site, name, RejectReason::ReflectionPattern, Vec::new()));
        }
        self.locals.insert((scope, name.to_string()));
        Ok(())
    }

    /// `import module [as alias]`; the module must exist in the registry
    pub fn register_import(
        &mut self,
        scope: ScopeId,
        site: Site,
        module: &str,
        alias: Option<&str>,
    ) -> Result<ImportResolution, CompileError> {
        let registry = self.unit.registry_arc();
        match self
            .unit
            .symbols_mut()
            .import_module(&registry, scope, module, alias)
        {
            Ok(()) => {
                tracing::debug!(unit = %self.name, module, alias, "Module imported");
                Ok(ImportResolution::Added)
            }
            Err(reason) => {
                let suggestions = did_you_mean(module, registry.module_names());
                Err(self.reject(site, module, reason, suggestions))
            }
        }
    }

    /// `from module import export [as alias]`
    pub fn register_from_import(
        &mut self,
        scope: ScopeId,
        site: Site,
        module: &str,
        export: &str,
        alias: Option<&str>,
    ) -> Result<ImportResolution, CompileError> {
        let registry = self.unit.registry_arc();
        match self
            .unit
            .symbols_mut()
            .import_member(&registry, scope, module, export, alias)
        {
            Ok(()) => Ok(ImportResolution::Added),
            Err(RejectReason::UnknownModule) => {
                let suggestions = did_you_mean(module, registry.module_names());
                Err(self.reject(site, module, RejectReason::UnknownModule, suggestions))
            }
            Err(reason) => {
                let suggestions = registry
                    .module(module)
                    .map(|m| did_you_mean(export, m.export_names()))
                    .unwrap_or_default();
                Err(self.reject(site, export, reason, suggestions))
            }
        }
    }

    // ------------------------------------------------------------------
    // Resolution entry points
    // ------------------------------------------------------------------

    /// Resolve the callee of a call node.
    ///
    /// Bare names check builtins, then this unit's functions, then imported
    /// exports. Any other callee shape must go through the guarded `call`
    /// builtin instead.
    pub fn resolve_call(&self, scope: ScopeId, callee: &Expr) -> Result<CallResolution, CompileError> {
        let site = callee.site();
        match &callee.kind {
            ExprKind::Name(name) => {
                decision::resolve_function(self.unit.registry(), self.unit.symbols(), scope, name)
                    .map(CallResolution::from)
                    .map_err(|reason| {
                        let suggestions = if reason == RejectReason::ReflectionPattern {
                            Vec::new()
                        } else {
                            self.function_suggestions(scope, name)
                        };
                        self.reject(site, name, reason, suggestions)
                    })
            }
            ExprKind::Attribute { object, name } => {
                match self.resolve_member(scope, site, object, name, true)? {
                    AttributeResolution::ModuleMember { module, name } => {
                        Ok(CallResolution::Module { module, name })
                    }
                    other => Ok(CallResolution::Method(other)),
                }
            }
            _ => Err(self.reject(site, "<expression>", RejectReason::IndirectCall, Vec::new())),
        }
    }

    /// Resolve a read of `object.name`
    pub fn resolve_attribute(
        &self,
        scope: ScopeId,
        object: &Expr,
        name: &str,
    ) -> Result<AttributeResolution, CompileError> {
        self.resolve_member(scope, object.site(), object, name, false)
    }

    fn resolve_member(
        &self,
        scope: ScopeId,
        site: Site,
        object: &Expr,
        name: &str,
        called: bool,
    ) -> Result<AttributeResolution, CompileError> {
        let registry = self.unit.registry();
        let symbols = self.unit.symbols();

        if let Some(alias) = object.as_name() {
            if self.is_module_alias(scope, object) {
                return match decision::resolve_module_member(registry, symbols, scope, alias, name) {
                    Ok(target) => Ok(AttributeResolution::ModuleMember {
                        module: target_module(&target),
                        name: name.to_string(),
                    }),
                    Err(reason) => {
                        let suggestions = symbols
                            .module_for_alias(scope, alias)
                            .and_then(|m| registry.module(m))
                            .map(|m| did_you_mean(name, m.export_names()))
                            .unwrap_or_default();
                        Err(self.reject(site, name, reason, suggestions))
                    }
                };
            }
        }

        let type_name = object.static_type();
        let classified = if called {
            decision::classify_method_call(registry, type_name, name)
        } else {
            decision::classify_attribute(registry, type_name, name)
        };
        match classified {
            AttributeDecision::Direct(attr) => Ok(AttributeResolution::Direct {
                type_name: type_name.unwrap_or_default().to_string(),
                attribute: attr.clone(),
            }),
            AttributeDecision::Mapped { builtin } => Ok(AttributeResolution::MappedCall { builtin }),
            AttributeDecision::RuntimeGuarded => Ok(AttributeResolution::RuntimeGuarded {
                name: name.to_string(),
            }),
            AttributeDecision::Rejected(reason) => {
                let suggestions = if reason == RejectReason::ReflectionPattern {
                    Vec::new()
                } else {
                    did_you_mean(name, registry.attribute_names(type_name))
                };
                Err(self.reject(site, name, reason, suggestions))
            }
        }
    }

    /// Resolve a bare name read as a value, e.g. `f = len`
    pub fn resolve_reference(&self, scope: ScopeId, site: Site, name: &str) -> Result<NameResolution, CompileError> {
        if is_reflection_name(name) {
            return Err(self.reject(site, name, RejectReason::ReflectionPattern, Vec::new()));
        }
        if self.is_local(scope, name) {
            return Ok(NameResolution::Variable);
        }
        let symbols = self.unit.symbols();
        if let Some(module) = symbols.module_for_alias(scope, name) {
            return Ok(NameResolution::Module(module.to_string()));
        }
        decision::resolve_function(self.unit.registry(), symbols, scope, name)
            .map(|target| NameResolution::Function(target.identity()))
            .map_err(|reason| {
                let suggestions = self.function_suggestions(scope, name);
                self.reject(site, name, reason, suggestions)
            })
    }

    // ------------------------------------------------------------------
    // Whole-program compilation
    // ------------------------------------------------------------------

    /// Analyze and resolve a whole program.
    ///
    /// The static analyzer runs first; any rejection stops compilation
    /// before a single node is emitted.
    pub fn compile(mut self, program: &Program) -> Result<CompiledProgram, Vec<CompileError>> {
        let registry = self.unit.registry_arc();
        if let Err(errors) = StaticAnalyzer::new(&registry).analyze(program).into_result() {
            for err in &errors {
                self.report(err);
            }
            return Err(errors);
        }

        let mut emitter = Emitter {
            adapter: &mut self,
            plan: BTreeMap::new(),
            errors: Vec::new(),
        };
        walk_program(&mut emitter, program);
        let Emitter { plan, errors, .. } = emitter;
        if !errors.is_empty() {
            return Err(errors);
        }

        tracing::debug!(unit = %self.name, nodes = plan.len(), "Program compiled");
        Ok(CompiledProgram {
            registry,
            symbols: self.finish(),
            plan,
        })
    }

    /// Freeze the unit's symbols for the runtime validator
    pub fn finish(self) -> Arc<ProgramSymbols> {
        self.unit.finish()
    }

    fn is_module_alias(&self, scope: ScopeId, object: &Expr) -> bool {
        object.as_name().is_some_and(|alias| {
            !self.is_local(scope, alias) && self.unit.symbols().module_for_alias(scope, alias).is_some()
        })
    }
}

/// Records one emission per resolved node of a program walk
struct Emitter<'a> {
    adapter: &'a mut CodegenAdapter,
    plan: BTreeMap<NodeId, Emission>,
    errors: Vec<CompileError>,
}

impl Emitter<'_> {
    fn emit(&mut self, node: NodeId, result: Result<Emission, CompileError>) {
        match result {
            Ok(emission) => {
                self.plan.insert(node, emission);
            }
            Err(err) => self.errors.push(err),
        }
    }

    fn check(&mut self, result: Result<(), CompileError>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }
}

impl Visitor for Emitter<'_> {
    fn symbols(&self) -> &ProgramSymbols {
        self.adapter.unit.symbols()
    }

    fn is_local(&self, scope: ScopeId, name: &str) -> bool {
        self.adapter.is_local(scope, name)
    }

    fn open_scope(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        self.adapter.open_scope(parent, name)
    }

    fn define_function(&mut self, scope: ScopeId, site: Site, name: &str) {
        let result = self.adapter.define_function(scope, site, name);
        self.check(result);
    }

    fn import_module(&mut self, scope: ScopeId, site: Site, module: &str, alias: Option<&str>) {
        let result = self.adapter.register_import(scope, site, module, alias);
        self.emit(site.node, result.map(Emission::Import));
    }

    fn import_member(
        &mut self,
        scope: ScopeId,
        site: Site,
        module: &str,
        export: &str,
        alias: Option<&str>,
    ) {
        let result = self
            .adapter
            .register_from_import(scope, site, module, export, alias);
        self.emit(site.node, result.map(Emission::Import));
    }

    fn declare_local(&mut self, scope: ScopeId, site: Site, name: &str) {
        let result = self.adapter.declare_local(scope, site, name);
        self.check(result);
    }

    fn reference(&mut self, scope: ScopeId, site: Site, name: &str) {
        let result = self.adapter.resolve_reference(scope, site, name);
        self.emit(site.node, result.map(Emission::Reference));
    }

    fn call(&mut self, scope: ScopeId, site: Site, callee: &Expr) {
        let result = self.adapter.resolve_call(scope, callee);
        self.emit(site.node, result.map(Emission::Call));
    }

    fn attribute(&mut self, scope: ScopeId, site: Site, object: &Expr, name: &str) {
        let result = self.adapter.resolve_attribute(scope, object, name);
        self.emit(site.node, result.map(Emission::Attribute));
    }

    fn dynamic_attribute(&mut self, _scope: ScopeId, site: Site, name: &Expr) {
        let result = match name.as_str_literal() {
            Some(literal) if is_reflection_name(literal) => Err(self.adapter.reject(
                site,
                literal,
                RejectReason::ReflectionPattern,
                Vec::new(),
            )),
            _ => Ok(Emission::DynamicAttribute),
        };
        self.emit(site.node, result);
    }
}

fn target_module(target: &CallTarget) -> String {
    match target {
        CallTarget::Module { module, .. } => module.clone(),
        _ => String::new(),
    }
}

impl std::fmt::Debug for CodegenAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodegenAdapter")
            .field("name", &self.name)
            .field("locals", &self.locals.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;
    use crate::audit::{AuditEventType, MemoryAuditSink};
    use crate::registry::RegistryPresets;
    use capgate_api::{FunctionOrigin, MemberDecl, TypeDecl};

    const DOCUMENT: TypeDecl = TypeDecl {
        type_name: "Document",
        members: &[
            MemberDecl::property("title", "Title"),
            MemberDecl::method("save", "Save").requiring(&["file.write"]),
            MemberDecl::forbidden("raw_handle", "Native handle"),
        ],
    };

    fn registry() -> Arc<AccessRegistry> {
        Arc::new(RegistryPresets::standard_builder().declare_type(&DOCUMENT).build())
    }

    fn adapter() -> CodegenAdapter {
        CodegenAdapter::new("test", registry())
    }

    #[test]
    fn test_call_resolution_order() {
        let mut gen = adapter();
        let site = Site::default();
        gen.define_function(ScopeId::MODULE, site, "helper").unwrap();
        gen.define_function(ScopeId::MODULE, site, "len").unwrap();
        gen.register_from_import(ScopeId::MODULE, site, "math", "sqrt", None)
            .unwrap();

        // Builtins shadow user functions of the same name
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::name("len")).unwrap(),
            CallResolution::Builtin { name: "len".into() }
        );
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::name("helper")).unwrap(),
            CallResolution::User {
                scope: ScopeId::MODULE,
                name: "helper".into()
            }
        );
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::name("sqrt")).unwrap(),
            CallResolution::Module {
                module: "math".into(),
                name: "sqrt".into()
            }
        );
        assert_eq!(
            gen.unit().resolve_function(ScopeId::MODULE, "sqrt"),
            Some(FunctionOrigin::Imported {
                module: "math".into()
            })
        );
    }

    #[test]
    fn test_unknown_call_is_compile_error() {
        let gen = adapter();
        let err = gen
            .resolve_call(ScopeId::MODULE, &Expr::name("exec"))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::ReflectionPattern);

        let err = gen
            .resolve_call(ScopeId::MODULE, &Expr::name("prnt"))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::UnregisteredFunction);
        assert!(err.suggestions.contains(&"print".to_string()));
    }

    #[test]
    fn test_register_import() {
        let mut gen = adapter();
        let site = Site::default();
        assert_eq!(
            gen.register_import(ScopeId::MODULE, site, "json", None).unwrap(),
            ImportResolution::Added
        );
        let err = gen
            .register_import(ScopeId::MODULE, site, "jsn", None)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::UnknownModule);
        assert_eq!(err.suggestions, vec!["json".to_string()]);
    }

    #[test]
    fn test_module_member_resolution() {
        let mut gen = adapter();
        gen.register_import(ScopeId::MODULE, Site::default(), "math", Some("m"))
            .unwrap();

        let callee = Expr::attr(Expr::name("m"), "sqrt");
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &callee).unwrap(),
            CallResolution::Module {
                module: "math".into(),
                name: "sqrt".into()
            }
        );

        let err = gen
            .resolve_call(ScopeId::MODULE, &Expr::attr(Expr::name("m"), "sqr"))
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::NotExported);
        assert!(err.suggestions.contains(&"sqrt".to_string()));
    }

    #[test]
    fn test_attribute_resolution() {
        let gen = adapter();
        let doc = Expr::name("doc").typed("Document");

        assert!(matches!(
            gen.resolve_attribute(ScopeId::MODULE, &doc, "title").unwrap(),
            AttributeResolution::Direct { ref type_name, .. } if type_name == "Document"
        ));
        assert_eq!(
            gen.resolve_attribute(ScopeId::MODULE, &Expr::str("abc"), "length")
                .unwrap(),
            AttributeResolution::MappedCall {
                builtin: "len".into()
            }
        );
        assert_eq!(
            gen.resolve_attribute(ScopeId::MODULE, &Expr::name("x"), "title")
                .unwrap(),
            AttributeResolution::RuntimeGuarded {
                name: "title".into()
            }
        );
        assert_eq!(
            gen.resolve_attribute(ScopeId::MODULE, &doc, "raw_handle")
                .unwrap_err()
                .reason,
            RejectReason::ForbiddenAttribute
        );
        assert_eq!(
            gen.resolve_attribute(ScopeId::MODULE, &doc, "__class__")
                .unwrap_err()
                .reason,
            RejectReason::ReflectionPattern
        );
    }

    #[test]
    fn test_called_member_resolution() {
        let gen = adapter();
        let doc = Expr::name("doc").typed("Document");

        assert!(matches!(
            gen.resolve_call(ScopeId::MODULE, &Expr::attr(doc.clone(), "save")).unwrap(),
            CallResolution::Method(AttributeResolution::Direct { ref attribute, .. })
                if attribute.name == "save"
        ));
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::attr(doc, "title"))
                .unwrap_err()
                .reason,
            RejectReason::UnregisteredAttribute
        );
        // `length` is readable but there is nothing to call
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::attr(Expr::str("abc"), "length"))
                .unwrap_err()
                .reason,
            RejectReason::UnregisteredAttribute
        );
        assert_eq!(
            gen.resolve_call(ScopeId::MODULE, &Expr::attr(Expr::name("x"), "upper"))
                .unwrap(),
            CallResolution::Method(AttributeResolution::RuntimeGuarded {
                name: "upper".into()
            })
        );
    }

    #[test]
    fn test_reference_carries_identity() {
        let mut gen = adapter();
        gen.define_function(ScopeId::MODULE, Site::default(), "double")
            .unwrap();

        assert_eq!(
            gen.resolve_reference(ScopeId::MODULE, Site::default(), "double")
                .unwrap(),
            NameResolution::Function(CallableIdentity::user(ScopeId::MODULE, "double"))
        );
        assert_eq!(
            gen.resolve_reference(ScopeId::MODULE, Site::default(), "os_system")
                .unwrap_err()
                .reason,
            RejectReason::UnregisteredFunction
        );
    }

    #[test]
    fn test_compile_program() {
        let program = Program::new(vec![
            Stmt::import("math"),
            Stmt::def("double", &["x"], vec![Stmt::ret(Some(Expr::name("x")))]),
            Stmt::assign("f", Expr::name("double")),
            Stmt::expr(Expr::call_name(
                "map",
                vec![Expr::name("f"), Expr::list(vec![Expr::int(1)])],
            )),
            Stmt::expr(Expr::call(Expr::attr(Expr::name("math"), "sqrt"), vec![Expr::int(4)])),
        ]);

        let compiled = adapter().compile(&program).unwrap();
        assert!(compiled.symbols.defines_function(ScopeId::MODULE, "double"));
        assert!(compiled.symbols.imports_module("math"));
        assert!(compiled.plan.values().any(|e| matches!(
            e,
            Emission::Call(CallResolution::Builtin { name }) if name == "map"
        )));
        assert!(compiled.plan.values().any(|e| matches!(
            e,
            Emission::Call(CallResolution::Module { module, .. }) if module == "math"
        )));
    }

    #[test]
    fn test_compile_rejection_is_audited() {
        let sink = Arc::new(MemoryAuditSink::new());
        let gen = CodegenAdapter::new("unit", registry()).with_audit(sink.clone());
        let program = Program::new(vec![Stmt::expr(Expr::call_name(
            "os_system",
            vec![Expr::str("rm")],
        ))]);

        let errors = gen.compile(&program).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, RejectReason::UnregisteredFunction);
        assert_eq!(sink.find_by_type(AuditEventType::CompileRejected).len(), 1);
    }

    #[test]
    fn test_adapter_never_extends_registry() {
        let registry = registry();
        let mut gen = CodegenAdapter::new("unit", Arc::clone(&registry));
        gen.define_function(ScopeId::MODULE, Site::default(), "helper")
            .unwrap();
        gen.finish();
        assert!(registry.builtin("helper").is_none());
    }
}
