//! Builder for [`AccessRegistry`]
//!
//! Registrations are data: host types and modules hand over static
//! declaration tables ([`TypeDecl`], [`ModuleDecl`], [`FunctionDecl`]) or
//! owned entries. A `Forbidden` entry always wins: once `(type, name)` is
//! forbidden, later registrations for the pair are ignored.

use super::{AccessRegistry, AttributeMapping, ModuleSurface};
use capgate_api::{FunctionDecl, ModuleDecl, SafeAttribute, SafeFunction, TypeDecl};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    types: HashMap<String, HashMap<String, SafeAttribute>>,
    builtins: HashMap<String, SafeFunction>,
    modules: HashMap<String, ModuleSurface>,
    mappings: HashMap<String, AttributeMapping>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn from_registry(registry: AccessRegistry) -> Self {
        let (types, builtins, modules, mappings) = registry.into_parts();
        Self {
            types,
            builtins,
            modules,
            mappings,
        }
    }

    /// Register every member of a host type declaration
    pub fn declare_type(mut self, decl: &TypeDecl) -> Self {
        for member in decl.members {
            self.insert_attribute(decl.type_name, SafeAttribute::from(member));
        }
        self
    }

    /// Register one attribute of a host type
    pub fn register_attribute(mut self, type_name: &str, attribute: SafeAttribute) -> Self {
        self.insert_attribute(type_name, attribute);
        self
    }

    /// Forbid `(type, name)` for the lifetime of the registry
    pub fn forbid(self, type_name: &str, name: &str) -> Self {
        self.register_attribute(type_name, SafeAttribute::forbidden(name, "forbidden by host"))
    }

    fn insert_attribute(&mut self, type_name: &str, attribute: SafeAttribute) {
        let members = self.types.entry(type_name.to_string()).or_default();
        match members.get(&attribute.name) {
            Some(existing) if existing.is_forbidden() => {
                tracing::debug!(
                    type_name,
                    attribute = %attribute.name,
                    "Ignoring registration for forbidden attribute"
                );
            }
            _ => {
                members.insert(attribute.name.clone(), attribute);
            }
        }
    }

    pub fn declare_builtins(mut self, decls: &[FunctionDecl]) -> Self {
        for decl in decls {
            self.builtins
                .insert(decl.name.to_string(), SafeFunction::from(decl));
        }
        self
    }

    pub fn register_builtin(mut self, function: SafeFunction) -> Self {
        self.builtins.insert(function.name.clone(), function);
        self
    }

    pub fn declare_module(self, decl: &ModuleDecl) -> Self {
        self.register_module(decl.module_name, decl.exports.iter().map(SafeFunction::from))
    }

    /// Register a module; exports merge into an existing module of that name
    pub fn register_module(
        mut self,
        name: &str,
        exports: impl IntoIterator<Item = SafeFunction>,
    ) -> Self {
        let module = self
            .modules
            .entry(name.to_string())
            .or_insert_with(|| ModuleSurface {
                name: name.to_string(),
                exports: HashMap::new(),
            });
        for export in exports {
            module.exports.insert(export.name.clone(), export);
        }
        self
    }

    /// Resolve `object.attribute` through `builtin(object)` for the listed
    /// types (all types when empty)
    pub fn map_attribute(mut self, attribute: &str, builtin: &str, applies_to: &[&str]) -> Self {
        self.mappings.insert(
            attribute.to_string(),
            AttributeMapping {
                attribute: attribute.to_string(),
                builtin: builtin.to_string(),
                applies_to: applies_to.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    pub fn build(self) -> AccessRegistry {
        tracing::debug!(
            types = self.types.len(),
            builtins = self.builtins.len(),
            modules = self.modules.len(),
            "Access registry built"
        );
        AccessRegistry::from_parts(self.types, self.builtins, self.modules, self.mappings)
    }
}
