//! Scoped program walk
//!
//! The static analyzer and the codegen adapter visit the same nodes in the
//! same scopes through [`walk_program`]. Definitions, imports and
//! assignment targets of a block are hoisted before its expressions are
//! visited, and a function body opens a nested scope.

use crate::ast::{Expr, ExprKind, Program, Site, Stmt, StmtKind};
use crate::unit::ProgramSymbols;
use capgate_api::ScopeId;

pub(crate) trait Visitor {
    fn symbols(&self) -> &ProgramSymbols;

    fn is_local(&self, scope: ScopeId, name: &str) -> bool;

    fn open_scope(&mut self, parent: ScopeId, name: &str) -> ScopeId;

    fn define_function(&mut self, scope: ScopeId, site: Site, name: &str);

    fn import_module(&mut self, scope: ScopeId, site: Site, module: &str, alias: Option<&str>);

    fn import_member(
        &mut self,
        scope: ScopeId,
        site: Site,
        module: &str,
        export: &str,
        alias: Option<&str>,
    );

    /// Assignment target or parameter
    fn declare_local(&mut self, scope: ScopeId, site: Site, name: &str);

    /// Bare name read as a value
    fn reference(&mut self, scope: ScopeId, site: Site, name: &str);

    /// `callee(...)`; `site` is the call node. Sub-expressions of the
    /// callee and the arguments have already been visited.
    fn call(&mut self, scope: ScopeId, site: Site, callee: &Expr);

    /// Read of `object.name`
    fn attribute(&mut self, scope: ScopeId, site: Site, object: &Expr, name: &str);

    /// Attribute selected by a runtime value
    fn dynamic_attribute(&mut self, scope: ScopeId, site: Site, name: &Expr);

    /// `object` is a bare name bound to an imported module in `scope`
    fn is_module_alias(&self, scope: ScopeId, object: &Expr) -> bool {
        object.as_name().is_some_and(|alias| {
            !self.is_local(scope, alias) && self.symbols().module_for_alias(scope, alias).is_some()
        })
    }
}

pub(crate) fn walk_program<V: Visitor>(visitor: &mut V, program: &Program) {
    hoist(visitor, ScopeId::MODULE, &program.body);
    block(visitor, ScopeId::MODULE, &program.body);
}

fn hoist<V: Visitor>(visitor: &mut V, scope: ScopeId, body: &[Stmt]) {
    for stmt in body {
        let site = stmt.site();
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } => visitor.define_function(scope, site, name),
            StmtKind::Import { module, alias } => {
                visitor.import_module(scope, site, module, alias.as_deref())
            }
            StmtKind::ImportFrom { module, names } => {
                for (export, alias) in names {
                    visitor.import_member(scope, site, module, export, alias.as_deref());
                }
            }
            StmtKind::Assign { target, .. } => visitor.declare_local(scope, site, target),
            StmtKind::Expr(_) | StmtKind::Return(_) => {}
        }
    }
}

fn block<V: Visitor>(visitor: &mut V, scope: ScopeId, body: &[Stmt]) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Assign { value: e, .. } | StmtKind::Return(Some(e)) => {
                expr(visitor, scope, e)
            }
            StmtKind::FunctionDef { name, params, body } => {
                let inner = visitor.open_scope(scope, name);
                for param in params {
                    visitor.declare_local(inner, stmt.site(), param);
                }
                hoist(visitor, inner, body);
                block(visitor, inner, body);
            }
            StmtKind::Return(None) | StmtKind::Import { .. } | StmtKind::ImportFrom { .. } => {}
        }
    }
}

fn expr<V: Visitor>(visitor: &mut V, scope: ScopeId, node: &Expr) {
    match &node.kind {
        ExprKind::Literal(_) => {}
        ExprKind::List(items) => {
            for item in items {
                expr(visitor, scope, item);
            }
        }
        ExprKind::Name(name) => visitor.reference(scope, node.site(), name),
        ExprKind::Attribute { object, name } => {
            if !visitor.is_module_alias(scope, object) {
                expr(visitor, scope, object);
            }
            visitor.attribute(scope, node.site(), object, name);
        }
        ExprKind::DynamicAttribute { object, name } => {
            expr(visitor, scope, object);
            expr(visitor, scope, name);
            visitor.dynamic_attribute(scope, node.site(), name);
        }
        ExprKind::Call { callee, args } => {
            match &callee.kind {
                // A called name resolves as a function, not as a value
                ExprKind::Name(_) => {}
                ExprKind::Attribute { object, .. } => {
                    if !visitor.is_module_alias(scope, object) {
                        expr(visitor, scope, object);
                    }
                }
                _ => expr(visitor, scope, callee),
            }
            for arg in args {
                expr(visitor, scope, arg);
            }
            visitor.call(scope, node.site(), callee);
        }
    }
}
