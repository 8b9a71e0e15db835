//! Static analysis pass
//!
//! Runs once over a [`Program`] before code generation. Every call,
//! attribute access and name reference gets one [`Verdict`]:
//!
//! - `Allowed`: resolvable against the registry right now
//! - `Deferred`: the object's type is unknown, the runtime validator decides
//! - `Rejected`: compilation fails, with reason and suggestions
//!
//! The analyzer never touches the shared registry. Definitions and imports
//! are hoisted into a private symbol table per scope, so a function may be
//! called before the statement that defines it. The codegen adapter walks
//! the program the same way and consults the same [`decision`] functions.

use crate::ast::{Expr, ExprKind, NodeId, Program, Site, Span};
use crate::decision::{self, AttributeDecision};
use crate::error::{CompileError, RejectReason};
use crate::registry::{is_reflection_name, AccessRegistry};
use crate::suggest::did_you_mean;
use crate::unit::ProgramSymbols;
use crate::walk::{walk_program, Visitor};
use capgate_api::ScopeId;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Deferred,
    Rejected(CompileError),
}

/// Verdict for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub node: NodeId,
    pub span: Span,
    pub symbol: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    outcomes: Vec<NodeOutcome>,
}

impl AnalysisReport {
    pub fn outcomes(&self) -> &[NodeOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, node: NodeId) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node == node)
    }

    pub fn is_clean(&self) -> bool {
        self.rejections().next().is_none()
    }

    pub fn rejections(&self) -> impl Iterator<Item = &CompileError> {
        self.outcomes.iter().filter_map(|o| match &o.verdict {
            Verdict::Rejected(err) => Some(err),
            _ => None,
        })
    }

    pub fn deferred(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.verdict == Verdict::Deferred)
    }

    /// `Err` with every rejection when the program may not be compiled
    pub fn into_result(self) -> Result<Self, Vec<CompileError>> {
        let errors: Vec<CompileError> = self.rejections().cloned().collect();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(errors)
        }
    }
}

/// Read-only pre-codegen checker
#[derive(Debug, Clone, Copy)]
pub struct StaticAnalyzer<'r> {
    registry: &'r AccessRegistry,
}

impl<'r> StaticAnalyzer<'r> {
    pub fn new(registry: &'r AccessRegistry) -> Self {
        Self { registry }
    }

    pub fn analyze(&self, program: &Program) -> AnalysisReport {
        let mut walk = Walk {
            registry: self.registry,
            symbols: ProgramSymbols::new(),
            locals: HashSet::new(),
            outcomes: Vec::new(),
        };
        walk_program(&mut walk, program);

        let report = AnalysisReport {
            outcomes: walk.outcomes,
        };
        let rejected = report.rejections().count();
        if rejected > 0 {
            tracing::debug!(rejected, "Static analysis rejected program");
        } else {
            tracing::trace!(
                nodes = report.outcomes.len(),
                deferred = report.deferred().count(),
                "Static analysis passed"
            );
        }
        report
    }
}

struct Walk<'r> {
    registry: &'r AccessRegistry,
    symbols: ProgramSymbols,
    locals: HashSet<(ScopeId, String)>,
    outcomes: Vec<NodeOutcome>,
}

impl<'r> Walk<'r> {
    fn record(&mut self, site: Site, symbol: &str, verdict: Verdict) {
        self.outcomes.push(NodeOutcome {
            node: site.node,
            span: site.span,
            symbol: symbol.to_string(),
            verdict,
        });
    }

    fn reject(&mut self, site: Site, symbol: &str, reason: RejectReason, suggestions: Vec<String>) {
        let err = CompileError::new(site.node, site.span, symbol, reason).with_suggestions(suggestions);
        self.record(site, symbol, Verdict::Rejected(err));
    }

    fn function_candidates(&self, scope: ScopeId) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.builtin_names().collect();
        names.extend(self.symbols.visible_functions(scope));
        names
    }

    /// `object.name`, either read or called
    fn member(&mut self, scope: ScopeId, site: Site, object: &Expr, name: &str, called: bool) {
        if self.is_module_alias(scope, object) {
            let alias = object.as_name().unwrap_or_default();
            match decision::resolve_module_member(self.registry, &self.symbols, scope, alias, name) {
                Ok(_) => self.record(site, name, Verdict::Allowed),
                Err(reason) => {
                    let suggestions = self
                        .symbols
                        .module_for_alias(scope, alias)
                        .and_then(|m| self.registry.module(m))
                        .map(|m| did_you_mean(name, m.export_names()))
                        .unwrap_or_default();
                    self.reject(site, name, reason, suggestions);
                }
            }
            return;
        }

        let type_name = object.static_type();
        let classified = if called {
            decision::classify_method_call(self.registry, type_name, name)
        } else {
            decision::classify_attribute(self.registry, type_name, name)
        };
        match classified {
            AttributeDecision::Direct(_) | AttributeDecision::Mapped { .. } => {
                self.record(site, name, Verdict::Allowed)
            }
            AttributeDecision::RuntimeGuarded => self.record(site, name, Verdict::Deferred),
            AttributeDecision::Rejected(reason) => {
                let suggestions = if reason == RejectReason::ReflectionPattern {
                    Vec::new()
                } else {
                    did_you_mean(name, self.registry.attribute_names(type_name))
                };
                self.reject(site, name, reason, suggestions);
            }
        }
    }
}

impl Visitor for Walk<'_> {
    fn symbols(&self) -> &ProgramSymbols {
        &self.symbols
    }

    fn is_local(&self, scope: ScopeId, name: &str) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.locals.contains(&(id, name.to_string())) {
                return true;
            }
            current = self.symbols.parent(id);
        }
        false
    }

    fn open_scope(&mut self, parent: ScopeId, name: &str) -> ScopeId {
        self.symbols.open_scope(parent, name)
    }

    fn define_function(&mut self, scope: ScopeId, site: Site, name: &str) {
        if let Err(reason) = self.symbols.define_function(scope, name) {
            self.reject(site, name, reason, Vec::new());
        }
    }

    fn import_module(&mut self, scope: ScopeId, site: Site, module: &str, alias: Option<&str>) {
        match self.symbols.import_module(self.registry, scope, module, alias) {
            Ok(()) => self.record(site, module, Verdict::Allowed),
            Err(reason) => {
                let suggestions = did_you_mean(module, self.registry.module_names());
                self.reject(site, module, reason, suggestions);
            }
        }
    }

    fn import_member(
        &mut self,
        scope: ScopeId,
        site: Site,
        module: &str,
        export: &str,
        alias: Option<&str>,
    ) {
        match self
            .symbols
            .import_member(self.registry, scope, module, export, alias)
        {
            Ok(()) => self.record(site, export, Verdict::Allowed),
            Err(RejectReason::UnknownModule) => {
                let suggestions = did_you_mean(module, self.registry.module_names());
                self.reject(site, module, RejectReason::UnknownModule, suggestions);
            }
            Err(reason) => {
                let suggestions = self
                    .registry
                    .module(module)
                    .map(|m| did_you_mean(export, m.export_names()))
                    .unwrap_or_default();
                self.reject(site, export, reason, suggestions);
            }
        }
    }

    fn declare_local(&mut self, scope: ScopeId, site: Site, name: &str) {
        if is_reflection_name(name) {
            self.reject(site, name, RejectReason::ReflectionPattern, Vec::new());
        } else {
            self.locals.insert((scope, name.to_string()));
        }
    }

    fn reference(&mut self, scope: ScopeId, site: Site, name: &str) {
        if is_reflection_name(name) {
            self.reject(site, name, RejectReason::ReflectionPattern, Vec::new());
            return;
        }
        if self.is_local(scope, name) {
            return;
        }
        if self.symbols.module_for_alias(scope, name).is_some() {
            self.record(site, name, Verdict::Allowed);
            return;
        }
        match decision::resolve_function(self.registry, &self.symbols, scope, name) {
            Ok(_) => self.record(site, name, Verdict::Allowed),
            Err(reason) => {
                let suggestions = did_you_mean(name, self.function_candidates(scope));
                self.reject(site, name, reason, suggestions);
            }
        }
    }

    fn call(&mut self, scope: ScopeId, site: Site, callee: &Expr) {
        match &callee.kind {
            ExprKind::Name(name) => {
                match decision::resolve_function(self.registry, &self.symbols, scope, name) {
                    Ok(_) => self.record(site, name, Verdict::Allowed),
                    Err(reason) => {
                        let suggestions = if reason == RejectReason::ReflectionPattern {
                            Vec::new()
                        } else {
                            did_you_mean(name, self.function_candidates(scope))
                        };
                        self.reject(site, name, reason, suggestions);
                    }
                }
            }
            ExprKind::Attribute { object, name } => self.member(scope, site, object, name, true),
            _ => self.reject(site, "<expression>", RejectReason::IndirectCall, Vec::new()),
        }
    }

    fn attribute(&mut self, scope: ScopeId, site: Site, object: &Expr, name: &str) {
        self.member(scope, site, object, name, false);
    }

    fn dynamic_attribute(&mut self, _scope: ScopeId, site: Site, name: &Expr) {
        match name.as_str_literal() {
            Some(literal) if is_reflection_name(literal) => {
                self.reject(site, literal, RejectReason::ReflectionPattern, Vec::new());
            }
            _ => self.record(site, "<dynamic>", Verdict::Deferred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Stmt;
    use crate::registry::RegistryPresets;
    use capgate_api::{MemberDecl, TypeDecl};

    const DOCUMENT: TypeDecl = TypeDecl {
        type_name: "Document",
        members: &[
            MemberDecl::property("title", "Title"),
            MemberDecl::method("save", "Save").requiring(&["file.write"]),
            MemberDecl::forbidden("raw_handle", "Native handle"),
        ],
    };

    fn registry() -> AccessRegistry {
        RegistryPresets::standard_builder().declare_type(&DOCUMENT).build()
    }

    fn analyze(body: Vec<Stmt>) -> AnalysisReport {
        let registry = registry();
        StaticAnalyzer::new(&registry).analyze(&Program::new(body))
    }

    #[test]
    fn test_clean_program() {
        let report = analyze(vec![
            Stmt::import("math"),
            Stmt::assign("n", Expr::call_name("len", vec![Expr::str("abc")])),
            Stmt::expr(Expr::call(Expr::attr(Expr::name("math"), "sqrt"), vec![Expr::name("n")])),
            Stmt::expr(Expr::call(Expr::attr(Expr::str("abc"), "upper"), vec![])),
        ]);
        assert!(report.is_clean(), "{:?}", report.rejections().collect::<Vec<_>>());
    }

    #[test]
    fn test_unregistered_function_with_suggestion() {
        let report = analyze(vec![Stmt::expr(
            Expr::call_name("lenn", vec![Expr::str("x")]).at(3, 1),
        )]);
        let errors: Vec<_> = report.rejections().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, RejectReason::UnregisteredFunction);
        assert_eq!(errors[0].symbol, "lenn");
        assert_eq!(errors[0].node, NodeId(2));
        assert_eq!(errors[0].span, Span::new(3, 1));
        assert!(errors[0].suggestions.contains(&"len".to_string()));
        assert!(errors[0].suggestions.len() <= 3);
    }

    #[test]
    fn test_reflection_patterns_rejected() {
        let report = analyze(vec![
            Stmt::expr(Expr::attr(Expr::str("x"), "__class__")),
            Stmt::expr(Expr::call_name("eval", vec![Expr::str("1")])),
            Stmt::expr(Expr::dynamic_attr(Expr::name("len"), Expr::str("__globals__"))),
        ]);
        let reasons: Vec<_> = report.rejections().map(|e| e.reason).collect();
        assert_eq!(reasons, vec![RejectReason::ReflectionPattern; 3]);
    }

    #[test]
    fn test_forbidden_attribute_rejected() {
        let report = analyze(vec![Stmt::expr(Expr::attr(
            Expr::name("doc").typed("Document"),
            "raw_handle",
        ))]);
        let err = report.rejections().next().unwrap();
        assert_eq!(err.reason, RejectReason::ForbiddenAttribute);
    }

    #[test]
    fn test_unknown_type_is_deferred() {
        let report = analyze(vec![
            Stmt::def("f", &["x"], vec![Stmt::ret(Some(Expr::attr(Expr::name("x"), "title")))]),
        ]);
        assert!(report.is_clean());
        assert_eq!(report.deferred().count(), 1);
    }

    #[test]
    fn test_hoisted_definitions() {
        let report = analyze(vec![
            Stmt::expr(Expr::call_name("later", vec![])),
            Stmt::def("later", &[], vec![Stmt::ret(None)]),
        ]);
        assert!(report.is_clean());
    }

    #[test]
    fn test_calling_a_property_is_rejected() {
        let report = analyze(vec![Stmt::expr(Expr::call(
            Expr::attr(Expr::name("doc").typed("Document"), "title"),
            vec![],
        ))]);
        assert_eq!(
            report.rejections().next().map(|e| e.reason),
            Some(RejectReason::UnregisteredAttribute)
        );
    }

    #[test]
    fn test_calling_a_mapped_attribute_is_rejected() {
        let report = analyze(vec![
            Stmt::expr(Expr::attr(Expr::str("abc"), "length")),
            Stmt::expr(Expr::call(Expr::attr(Expr::str("abc"), "length"), vec![])),
        ]);
        let errors: Vec<_> = report.rejections().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "length");
        assert_eq!(errors[0].reason, RejectReason::UnregisteredAttribute);
        assert_eq!(errors[0].node, NodeId(5));
    }

    #[test]
    fn test_indirect_call_syntax_rejected() {
        let report = analyze(vec![Stmt::expr(Expr::call(
            Expr::call_name("list", vec![]),
            vec![],
        ))]);
        assert_eq!(
            report.rejections().next().map(|e| e.reason),
            Some(RejectReason::IndirectCall)
        );
    }

    #[test]
    fn test_unknown_module() {
        let report = analyze(vec![Stmt::import("os")]);
        assert_eq!(
            report.rejections().next().map(|e| e.reason),
            Some(RejectReason::UnknownModule)
        );
    }

    #[test]
    fn test_analyzer_is_read_only() {
        let registry = registry();
        let program = Program::new(vec![Stmt::def("helper", &[], vec![])]);
        StaticAnalyzer::new(&registry).analyze(&program);
        assert!(registry.builtin("helper").is_none());
    }
}
