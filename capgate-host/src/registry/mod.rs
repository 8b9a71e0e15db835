//! Default-deny access registry
//!
//! The registry is the whitelist: every attribute of every host type, every
//! builtin and every module export a script may touch is listed here.
//! Anything absent is denied. It is built once by a [`RegistryBuilder`] and
//! then shared read-only (usually behind an `Arc`) by the analyzer, the
//! codegen adapter and every runtime validator.
//!
//! # Lookup rules
//!
//! | Name | Result |
//! |------|--------|
//! | `__x__`, `_x`, known reflection names | always rejected |
//! | registered `Forbidden` | rejected, never overridden |
//! | registered `Method`/`Property` | allowed when required capabilities are held |
//! | not registered | rejected |

mod builder;
pub mod presets;

pub use builder::RegistryBuilder;
pub use presets::RegistryPresets;

use crate::context::CapabilitySource;
use crate::unit::ProgramSymbols;
use capgate_api::{AccessKind, FunctionOrigin, SafeAttribute, SafeFunction, ScopeId};
use std::collections::{BTreeSet, HashMap};

/// Names that expose interpreter internals regardless of prefix
pub const REFLECTION_NAMES: &[&str] = &[
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "eval",
    "exec",
    "compile",
    "breakpoint",
    "builtins",
    "mro",
    "f_globals",
    "f_locals",
    "f_back",
    "f_code",
    "gi_frame",
    "gi_code",
    "co_code",
    "func_globals",
    "func_code",
    "im_func",
    "im_self",
];

/// Whether a name is convention-marked as introspection/reflection
pub fn is_reflection_name(name: &str) -> bool {
    name.starts_with('_') || REFLECTION_NAMES.contains(&name)
}

/// Result of looking up `(type, name)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeLookup<'r> {
    Registered(&'r SafeAttribute),
    Forbidden,
    Reflection,
    Unregistered,
}

/// A pseudo-attribute resolved through a builtin instead of a native member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMapping {
    pub attribute: String,
    pub builtin: String,
    /// Types the mapping applies to; empty means every type
    pub applies_to: BTreeSet<String>,
}

impl AttributeMapping {
    pub fn applies(&self, type_name: Option<&str>) -> bool {
        match type_name {
            Some(t) => self.applies_to.is_empty() || self.applies_to.contains(t),
            None => true,
        }
    }
}

/// Exported surface of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSurface {
    name: String,
    exports: HashMap<String, SafeFunction>,
}

impl ModuleSurface {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn export(&self, name: &str) -> Option<&SafeFunction> {
        if is_reflection_name(name) {
            return None;
        }
        self.exports.get(name)
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

/// Immutable whitelist tables
#[derive(Debug, Clone, Default)]
pub struct AccessRegistry {
    types: HashMap<String, HashMap<String, SafeAttribute>>,
    builtins: HashMap<String, SafeFunction>,
    modules: HashMap<String, ModuleSurface>,
    mappings: HashMap<String, AttributeMapping>,
}

impl AccessRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry that denies everything
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start a builder seeded with these tables, for host extensions
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder::from_registry(self.clone())
    }

    pub(crate) fn from_parts(
        types: HashMap<String, HashMap<String, SafeAttribute>>,
        builtins: HashMap<String, SafeFunction>,
        modules: HashMap<String, ModuleSurface>,
        mappings: HashMap<String, AttributeMapping>,
    ) -> Self {
        Self {
            types,
            builtins,
            modules,
            mappings,
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        HashMap<String, HashMap<String, SafeAttribute>>,
        HashMap<String, SafeFunction>,
        HashMap<String, ModuleSurface>,
        HashMap<String, AttributeMapping>,
    ) {
        (self.types, self.builtins, self.modules, self.mappings)
    }

    pub fn lookup_attribute(&self, type_name: &str, name: &str) -> AttributeLookup<'_> {
        if is_reflection_name(name) {
            return AttributeLookup::Reflection;
        }
        match self.types.get(type_name).and_then(|members| members.get(name)) {
            Some(attr) if attr.access_kind == AccessKind::Forbidden => AttributeLookup::Forbidden,
            Some(attr) => AttributeLookup::Registered(attr),
            None => AttributeLookup::Unregistered,
        }
    }

    /// True iff `(type, name)` is registered, not forbidden, and every
    /// required capability is held by `capabilities`
    pub fn is_safe_attribute<C>(&self, type_name: &str, name: &str, capabilities: &C) -> bool
    where
        C: CapabilitySource + ?Sized,
    {
        match self.lookup_attribute(type_name, name) {
            AttributeLookup::Registered(attr) => attr
                .required_capabilities
                .iter()
                .all(|cap| capabilities.has_capability(cap)),
            _ => false,
        }
    }

    /// Whether any type registers `name` as a non-forbidden member
    pub fn is_registered_anywhere(&self, name: &str) -> bool {
        !is_reflection_name(name)
            && self
                .types
                .values()
                .filter_map(|members| members.get(name))
                .any(|attr| !attr.is_forbidden())
    }

    pub fn attribute_mapping(&self, name: &str, type_name: Option<&str>) -> Option<&AttributeMapping> {
        self.mappings.get(name).filter(|m| m.applies(type_name))
    }

    pub fn builtin(&self, name: &str) -> Option<&SafeFunction> {
        if is_reflection_name(name) {
            return None;
        }
        self.builtins.get(name)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSurface> {
        self.modules.get(name)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Resolve a callable name in a scope of a compilation unit
    pub fn resolve_function(
        &self,
        symbols: &ProgramSymbols,
        scope: ScopeId,
        name: &str,
    ) -> Option<FunctionOrigin> {
        crate::decision::resolve_function(self, symbols, scope, name)
            .ok()
            .and_then(|target| target.origin())
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Non-forbidden attribute names of one type, or of every type
    pub fn attribute_names(&self, type_name: Option<&str>) -> BTreeSet<&str> {
        let members = self
            .types
            .iter()
            .filter(|(t, _)| type_name.map_or(true, |wanted| wanted == t.as_str()))
            .flat_map(|(_, members)| members.values())
            .filter(|attr| !attr.is_forbidden())
            .map(|attr| attr.name.as_str());
        let mapped = self
            .mappings
            .values()
            .filter(|m| m.applies(type_name))
            .map(|m| m.attribute.as_str());
        members.chain(mapped).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoCapabilities;
    use capgate_api::{MemberDecl, TypeDecl};

    struct Holding(&'static [&'static str]);

    impl CapabilitySource for Holding {
        fn has_capability(&self, capability_type: &str) -> bool {
            self.0.contains(&capability_type)
        }
    }

    const DOCUMENT: TypeDecl = TypeDecl {
        type_name: "Document",
        members: &[
            MemberDecl::property("title", "Document title"),
            MemberDecl::method("save", "Persist the document").requiring(&["file.write"]),
            MemberDecl::forbidden("raw_handle", "Native file handle"),
        ],
    };

    fn registry() -> AccessRegistry {
        AccessRegistry::builder().declare_type(&DOCUMENT).build()
    }

    #[test]
    fn test_default_deny() {
        let registry = registry();
        assert!(!registry.is_safe_attribute("Document", "delete", &NoCapabilities));
        assert!(!registry.is_safe_attribute("Socket", "send", &NoCapabilities));
        assert!(registry.builtin("print").is_none());
        assert!(registry.module("os").is_none());
    }

    #[test]
    fn test_capability_gated_attribute() {
        let registry = registry();
        assert!(registry.is_safe_attribute("Document", "title", &NoCapabilities));
        assert!(!registry.is_safe_attribute("Document", "save", &NoCapabilities));
        assert!(registry.is_safe_attribute("Document", "save", &Holding(&["file.write"])));
    }

    #[test]
    fn test_forbidden_attribute() {
        let registry = registry();
        assert_eq!(
            registry.lookup_attribute("Document", "raw_handle"),
            AttributeLookup::Forbidden
        );
        assert!(!registry.is_safe_attribute("Document", "raw_handle", &Holding(&["file.write"])));
        assert!(!registry.is_registered_anywhere("raw_handle"));
    }

    #[test]
    fn test_reflection_names_rejected_even_if_registered() {
        let registry = AccessRegistry::builder()
            .register_attribute("Document", SafeAttribute::property("__class__", "leak"))
            .register_attribute("Document", SafeAttribute::method("_private", "leak"))
            .register_builtin(SafeFunction::new("eval", "leak"))
            .build();

        assert_eq!(
            registry.lookup_attribute("Document", "__class__"),
            AttributeLookup::Reflection
        );
        assert!(!registry.is_safe_attribute("Document", "_private", &NoCapabilities));
        assert!(registry.builtin("eval").is_none());
    }

    #[test]
    fn test_attribute_names_skip_forbidden() {
        let registry = registry();
        let names = registry.attribute_names(Some("Document"));
        assert!(names.contains("title"));
        assert!(names.contains("save"));
        assert!(!names.contains("raw_handle"));
    }
}
