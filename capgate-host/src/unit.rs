//! Per-compilation symbol tables
//!
//! Every compilation unit owns a [`ProgramSymbols`]: the lexical scopes of
//! the program, the functions defined in each, and the modules and members
//! imported into each. Nothing here is global, so two programs compiled
//! against the same registry never see each other's names.
//!
//! After compilation the table is frozen behind an `Arc` and handed to the
//! runtime validator, which re-checks callable identities against it.

use crate::error::RejectReason;
use crate::registry::{is_reflection_name, AccessRegistry};
use capgate_api::{FunctionOrigin, ScopeId};
use std::collections::HashMap;
use std::sync::Arc;

/// What a name is bound to in one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// `def name(...)`
    Function,
    /// `from module import export [as name]`
    Member { module: String, export: String },
    /// `import module [as name]`
    Module(String),
}

#[derive(Debug, Clone)]
struct ScopeEntry {
    parent: Option<ScopeId>,
    name: String,
}

#[derive(Debug, Clone)]
pub struct ProgramSymbols {
    scopes: Vec<ScopeEntry>,
    bindings: HashMap<(ScopeId, String), Binding>,
}

impl Default for ProgramSymbols {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramSymbols {
    /// A table holding only the module scope
    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeEntry {
                parent: None,
                name: "<module>".to_string(),
            }],
            bindings: HashMap::new(),
        }
    }

    /// Open a nested scope (a function body)
    pub fn open_scope(&mut self, parent: ScopeId, name: impl Into<String>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeEntry {
            parent: Some(parent),
            name: name.into(),
        });
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes.get(scope.0 as usize).and_then(|s| s.parent)
    }

    pub fn scope_name(&self, scope: ScopeId) -> Option<&str> {
        self.scopes.get(scope.0 as usize).map(|s| s.name.as_str())
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Record a user function definition
    pub fn define_function(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
    ) -> Result<(), RejectReason> {
        let name = name.into();
        if is_reflection_name(&name) {
            return Err(RejectReason::ReflectionPattern);
        }
        self.bindings.insert((scope, name), Binding::Function);
        Ok(())
    }

    /// Record `import module [as alias]`
    pub fn import_module(
        &mut self,
        registry: &AccessRegistry,
        scope: ScopeId,
        module: &str,
        alias: Option<&str>,
    ) -> Result<(), RejectReason> {
        let bound = alias.unwrap_or(module);
        if is_reflection_name(module) || is_reflection_name(bound) {
            return Err(RejectReason::ReflectionPattern);
        }
        if registry.module(module).is_none() {
            return Err(RejectReason::UnknownModule);
        }
        self.bindings
            .insert((scope, bound.to_string()), Binding::Module(module.to_string()));
        Ok(())
    }

    /// Record `from module import export [as alias]`
    pub fn import_member(
        &mut self,
        registry: &AccessRegistry,
        scope: ScopeId,
        module: &str,
        export: &str,
        alias: Option<&str>,
    ) -> Result<(), RejectReason> {
        let bound = alias.unwrap_or(export);
        if is_reflection_name(export) || is_reflection_name(bound) {
            return Err(RejectReason::ReflectionPattern);
        }
        let surface = registry.module(module).ok_or(RejectReason::UnknownModule)?;
        if surface.export(export).is_none() {
            return Err(RejectReason::NotExported);
        }
        self.bindings.insert(
            (scope, bound.to_string()),
            Binding::Member {
                module: module.to_string(),
                export: export.to_string(),
            },
        );
        Ok(())
    }

    /// Nearest binding of `name`, walking outwards from `scope`
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Binding)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(binding) = self.bindings.get(&(id, name.to_string())) {
                return Some((id, binding));
            }
            current = self.parent(id);
        }
        None
    }

    /// Binding of `name` in exactly `scope`
    pub fn binding(&self, scope: ScopeId, name: &str) -> Option<&Binding> {
        self.bindings.get(&(scope, name.to_string()))
    }

    /// Whether `scope` defines a user function called `name`
    pub fn defines_function(&self, scope: ScopeId, name: &str) -> bool {
        matches!(self.binding(scope, name), Some(Binding::Function))
    }

    /// The module an alias visible from `scope` refers to
    pub fn module_for_alias(&self, scope: ScopeId, alias: &str) -> Option<&str> {
        match self.lookup(scope, alias) {
            Some((_, Binding::Module(module))) => Some(module),
            _ => None,
        }
    }

    /// Whether the program imports anything from `module`
    pub fn imports_module(&self, module: &str) -> bool {
        self.bindings.values().any(|b| match b {
            Binding::Module(m) => m == module,
            Binding::Member { module: m, .. } => m == module,
            Binding::Function => false,
        })
    }

    /// Whether the program imported `export` from `module`, by any path
    pub fn imports_member(&self, module: &str, export: &str) -> bool {
        self.bindings.values().any(|b| match b {
            Binding::Module(m) => m == module,
            Binding::Member {
                module: m,
                export: e,
            } => m == module && e == export,
            Binding::Function => false,
        })
    }

    /// Callable names visible from `scope`, for suggestions
    pub fn visible_functions(&self, scope: ScopeId) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            chain.push(id);
            current = self.parent(id);
        }
        self.bindings
            .iter()
            .filter(|((s, _), b)| chain.contains(s) && !matches!(b, Binding::Module(_)))
            .map(|((_, name), _)| name.as_str())
            .collect()
    }
}

/// One program being compiled against a shared registry
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    registry: Arc<AccessRegistry>,
    symbols: ProgramSymbols,
}

impl CompilationUnit {
    pub fn new(registry: Arc<AccessRegistry>) -> Self {
        Self {
            registry,
            symbols: ProgramSymbols::new(),
        }
    }

    pub fn registry(&self) -> &AccessRegistry {
        &self.registry
    }

    pub fn registry_arc(&self) -> Arc<AccessRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn symbols(&self) -> &ProgramSymbols {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut ProgramSymbols {
        &mut self.symbols
    }

    /// Builtin, then user-defined, then imported
    pub fn resolve_function(&self, scope: ScopeId, name: &str) -> Option<FunctionOrigin> {
        self.registry.resolve_function(&self.symbols, scope, name)
    }

    /// Freeze the symbol table for the runtime
    pub fn finish(self) -> Arc<ProgramSymbols> {
        tracing::debug!(
            scopes = self.symbols.scope_count(),
            bindings = self.symbols.bindings.len(),
            "Compilation unit finished"
        );
        Arc::new(self.symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryPresets;

    fn unit() -> CompilationUnit {
        CompilationUnit::new(Arc::new(RegistryPresets::standard()))
    }

    #[test]
    fn test_resolution_order() {
        let mut unit = unit();
        let registry = unit.registry_arc();
        unit.symbols_mut().define_function(ScopeId::MODULE, "helper").unwrap();
        unit.symbols_mut()
            .import_member(&registry, ScopeId::MODULE, "math", "sqrt", None)
            .unwrap();
        // A user function shadowing a builtin does not win
        unit.symbols_mut().define_function(ScopeId::MODULE, "len").unwrap();

        assert_eq!(unit.resolve_function(ScopeId::MODULE, "len"), Some(FunctionOrigin::Builtin));
        assert_eq!(
            unit.resolve_function(ScopeId::MODULE, "helper"),
            Some(FunctionOrigin::UserDefined)
        );
        assert_eq!(
            unit.resolve_function(ScopeId::MODULE, "sqrt"),
            Some(FunctionOrigin::Imported {
                module: "math".into()
            })
        );
        assert_eq!(unit.resolve_function(ScopeId::MODULE, "system"), None);
    }

    #[test]
    fn test_scopes_are_lexical() {
        let mut unit = unit();
        let inner = unit.symbols_mut().open_scope(ScopeId::MODULE, "outer");
        unit.symbols_mut().define_function(inner, "nested").unwrap();

        assert!(unit.resolve_function(inner, "nested").is_some());
        assert!(unit.resolve_function(ScopeId::MODULE, "nested").is_none());
    }

    #[test]
    fn test_units_are_isolated() {
        let registry = Arc::new(RegistryPresets::standard());
        let mut a = CompilationUnit::new(Arc::clone(&registry));
        let b = CompilationUnit::new(registry);
        a.symbols_mut().define_function(ScopeId::MODULE, "helper").unwrap();

        assert!(a.resolve_function(ScopeId::MODULE, "helper").is_some());
        assert!(b.resolve_function(ScopeId::MODULE, "helper").is_none());
    }

    #[test]
    fn test_import_errors() {
        let registry = RegistryPresets::standard();
        let mut symbols = ProgramSymbols::new();

        assert_eq!(
            symbols.import_module(&registry, ScopeId::MODULE, "os", None),
            Err(RejectReason::UnknownModule)
        );
        assert_eq!(
            symbols.import_member(&registry, ScopeId::MODULE, "math", "system", None),
            Err(RejectReason::NotExported)
        );
        assert_eq!(
            symbols.import_member(&registry, ScopeId::MODULE, "math", "__loader__", None),
            Err(RejectReason::ReflectionPattern)
        );
        assert_eq!(
            symbols.define_function(ScopeId::MODULE, "__init__"),
            Err(RejectReason::ReflectionPattern)
        );
    }

    #[test]
    fn test_module_alias() {
        let registry = RegistryPresets::standard();
        let mut symbols = ProgramSymbols::new();
        symbols
            .import_module(&registry, ScopeId::MODULE, "math", Some("m"))
            .unwrap();

        assert_eq!(symbols.module_for_alias(ScopeId::MODULE, "m"), Some("math"));
        assert_eq!(symbols.module_for_alias(ScopeId::MODULE, "math"), None);
        assert!(symbols.imports_member("math", "floor"));
        assert!(!symbols.imports_module("json"));
    }
}
