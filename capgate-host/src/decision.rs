//! Shared allow/deny decisions
//!
//! The static analyzer, the codegen adapter and the runtime validator all
//! call into this module. A direct call and an indirect call of the same
//! target therefore reach the same verdict with the same [`RejectReason`].

use crate::error::RejectReason;
use crate::registry::{is_reflection_name, AccessRegistry, AttributeLookup};
use crate::runtime::CallableIdentity;
use crate::unit::{Binding, ProgramSymbols};
use capgate_api::{AccessKind, FunctionOrigin, SafeAttribute, ScopeId};
use std::collections::BTreeSet;

/// A resolved, permitted call target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallTarget {
    Builtin { name: String },
    User { scope: ScopeId, name: String },
    Module { module: String, name: String },
    Method { type_name: String, name: String },
}

impl CallTarget {
    /// Origin of a function target; `None` for methods
    pub fn origin(&self) -> Option<FunctionOrigin> {
        match self {
            Self::Builtin { .. } => Some(FunctionOrigin::Builtin),
            Self::User { .. } => Some(FunctionOrigin::UserDefined),
            Self::Module { module, .. } => Some(FunctionOrigin::Imported {
                module: module.clone(),
            }),
            Self::Method { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Builtin { name }
            | Self::User { name, .. }
            | Self::Module { name, .. }
            | Self::Method { name, .. } => name,
        }
    }

    pub fn identity(&self) -> CallableIdentity {
        match self {
            Self::Builtin { name } => CallableIdentity::builtin(name.clone()),
            Self::User { scope, name } => CallableIdentity::user(*scope, name.clone()),
            Self::Module { module, name } => CallableIdentity::imported(module.clone(), name.clone()),
            Self::Method { type_name, name } => {
                CallableIdentity::method(type_name.clone(), name.clone())
            }
        }
    }
}

/// Resolve a bare callable name: builtin, then user-defined, then imported
pub fn resolve_function(
    registry: &AccessRegistry,
    symbols: &ProgramSymbols,
    scope: ScopeId,
    name: &str,
) -> Result<CallTarget, RejectReason> {
    if is_reflection_name(name) {
        return Err(RejectReason::ReflectionPattern);
    }
    if registry.builtin(name).is_some() {
        return Ok(CallTarget::Builtin {
            name: name.to_string(),
        });
    }
    match symbols.lookup(scope, name) {
        Some((defined_in, Binding::Function)) => Ok(CallTarget::User {
            scope: defined_in,
            name: name.to_string(),
        }),
        Some((_, Binding::Member { module, export })) => {
            export_target(registry, module, export)
        }
        Some((_, Binding::Module(_))) | None => Err(RejectReason::UnregisteredFunction),
    }
}

/// Resolve `alias.member` where `alias` names an imported module
pub fn resolve_module_member(
    registry: &AccessRegistry,
    symbols: &ProgramSymbols,
    scope: ScopeId,
    alias: &str,
    member: &str,
) -> Result<CallTarget, RejectReason> {
    let module = symbols
        .module_for_alias(scope, alias)
        .ok_or(RejectReason::UnknownModule)?;
    if is_reflection_name(member) {
        return Err(RejectReason::ReflectionPattern);
    }
    export_target(registry, module, member)
}

fn export_target(
    registry: &AccessRegistry,
    module: &str,
    export: &str,
) -> Result<CallTarget, RejectReason> {
    let surface = registry.module(module).ok_or(RejectReason::UnknownModule)?;
    surface
        .export(export)
        .map(|_| CallTarget::Module {
            module: module.to_string(),
            name: export.to_string(),
        })
        .ok_or(RejectReason::NotExported)
}

/// How an attribute access compiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeDecision<'r> {
    /// Registered member of the known type
    Direct(&'r SafeAttribute),
    /// Pseudo-attribute rewritten to `builtin(object)`
    Mapped { builtin: String },
    /// Type unknown statically; the runtime validator decides
    RuntimeGuarded,
    Rejected(RejectReason),
}

/// Classify `object.name` given the object's static type, if known.
///
/// Order: reflection, forbidden, registered, mapped, unregistered.
pub fn classify_attribute<'r>(
    registry: &'r AccessRegistry,
    type_name: Option<&str>,
    name: &str,
) -> AttributeDecision<'r> {
    if is_reflection_name(name) {
        return AttributeDecision::Rejected(RejectReason::ReflectionPattern);
    }
    match type_name {
        Some(type_name) => match registry.lookup_attribute(type_name, name) {
            AttributeLookup::Reflection => {
                AttributeDecision::Rejected(RejectReason::ReflectionPattern)
            }
            AttributeLookup::Forbidden => {
                AttributeDecision::Rejected(RejectReason::ForbiddenAttribute)
            }
            AttributeLookup::Registered(attr) => AttributeDecision::Direct(attr),
            AttributeLookup::Unregistered => match registry.attribute_mapping(name, Some(type_name)) {
                Some(mapping) => AttributeDecision::Mapped {
                    builtin: mapping.builtin.clone(),
                },
                None => AttributeDecision::Rejected(RejectReason::UnregisteredAttribute),
            },
        },
        None => {
            if registry.is_registered_anywhere(name)
                || registry.attribute_mapping(name, None).is_some()
            {
                AttributeDecision::RuntimeGuarded
            } else if is_forbidden_everywhere(registry, name) {
                AttributeDecision::Rejected(RejectReason::ForbiddenAttribute)
            } else {
                AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
            }
        }
    }
}

/// Classify `object.name(...)`.
///
/// Only registered methods can be called. Properties and mapped
/// pseudo-attributes have no callable behind them and are rejected.
pub fn classify_method_call<'r>(
    registry: &'r AccessRegistry,
    type_name: Option<&str>,
    name: &str,
) -> AttributeDecision<'r> {
    match classify_attribute(registry, type_name, name) {
        AttributeDecision::Direct(attr) if attr.access_kind != AccessKind::Method => {
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        }
        AttributeDecision::Mapped { .. } => {
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        }
        other => other,
    }
}

fn is_forbidden_everywhere(registry: &AccessRegistry, name: &str) -> bool {
    registry
        .type_names()
        .any(|t| registry.lookup_attribute(t, name) == AttributeLookup::Forbidden)
}

/// Re-derive the permission of a callable value at call time
pub fn resolve_identity(
    registry: &AccessRegistry,
    symbols: &ProgramSymbols,
    identity: &CallableIdentity,
) -> Result<CallTarget, RejectReason> {
    if is_reflection_name(identity.symbol()) {
        return Err(RejectReason::ReflectionPattern);
    }
    match identity {
        CallableIdentity::Builtin { name } => registry
            .builtin(name)
            .map(|_| CallTarget::Builtin { name: name.clone() })
            .ok_or(RejectReason::UnregisteredFunction),
        CallableIdentity::User { scope, name } => {
            if symbols.defines_function(*scope, name) {
                Ok(CallTarget::User {
                    scope: *scope,
                    name: name.clone(),
                })
            } else {
                Err(RejectReason::UnregisteredFunction)
            }
        }
        CallableIdentity::Imported { module, name } => {
            if !symbols.imports_member(module, name) {
                return Err(RejectReason::UnknownModule);
            }
            export_target(registry, module, name)
        }
        CallableIdentity::Method { type_name, name } => {
            match registry.lookup_attribute(type_name, name) {
                AttributeLookup::Registered(attr) if attr.access_kind == AccessKind::Method => {
                    Ok(CallTarget::Method {
                        type_name: type_name.clone(),
                        name: name.clone(),
                    })
                }
                AttributeLookup::Registered(_) | AttributeLookup::Unregistered => {
                    Err(RejectReason::UnregisteredAttribute)
                }
                AttributeLookup::Forbidden => Err(RejectReason::ForbiddenAttribute),
                AttributeLookup::Reflection => Err(RejectReason::ReflectionPattern),
            }
        }
        CallableIdentity::Native { .. } => Err(RejectReason::UnregisteredFunction),
    }
}

/// Capabilities a permitted target needs at call time
pub fn required_capabilities(registry: &AccessRegistry, target: &CallTarget) -> BTreeSet<String> {
    match target {
        CallTarget::Builtin { name } => registry
            .builtin(name)
            .map(|f| f.required_capabilities.clone())
            .unwrap_or_default(),
        CallTarget::User { .. } => BTreeSet::new(),
        CallTarget::Module { module, name } => registry
            .module(module)
            .and_then(|m| m.export(name))
            .map(|f| f.required_capabilities.clone())
            .unwrap_or_default(),
        CallTarget::Method { type_name, name } => match registry.lookup_attribute(type_name, name) {
            AttributeLookup::Registered(attr) => attr.required_capabilities.clone(),
            _ => BTreeSet::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        RegistryPresets::standard_builder()
            .declare_type(&DOCUMENT)
            .build()
    }

    #[test]
    fn test_direct_and_indirect_agree() {
        let registry = registry();
        let mut symbols = ProgramSymbols::new();
        symbols.define_function(ScopeId::MODULE, "helper").unwrap();
        symbols
            .import_member(&registry, ScopeId::MODULE, "math", "sqrt", None)
            .unwrap();

        for name in ["len", "helper", "sqrt", "os_system", "eval", "__import__"] {
            let direct = resolve_function(&registry, &symbols, ScopeId::MODULE, name);
            let identity = match &direct {
                Ok(target) => target.identity(),
                Err(_) => CallableIdentity::native(name),
            };
            let indirect = resolve_identity(&registry, &symbols, &identity);
            assert_eq!(direct, indirect, "mismatch for {}", name);
        }
    }

    #[test]
    fn test_classify_attribute_known_type() {
        let registry = registry();
        assert!(matches!(
            classify_attribute(&registry, Some("Document"), "title"),
            AttributeDecision::Direct(_)
        ));
        assert_eq!(
            classify_attribute(&registry, Some("Document"), "raw_handle"),
            AttributeDecision::Rejected(RejectReason::ForbiddenAttribute)
        );
        assert_eq!(
            classify_attribute(&registry, Some("Document"), "__class__"),
            AttributeDecision::Rejected(RejectReason::ReflectionPattern)
        );
        assert_eq!(
            classify_attribute(&registry, Some("str"), "length"),
            AttributeDecision::Mapped {
                builtin: "len".into()
            }
        );
        assert_eq!(
            classify_attribute(&registry, Some("Document"), "length"),
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        );
    }

    #[test]
    fn test_classify_attribute_unknown_type() {
        let registry = registry();
        assert_eq!(
            classify_attribute(&registry, None, "upper"),
            AttributeDecision::RuntimeGuarded
        );
        assert_eq!(
            classify_attribute(&registry, None, "length"),
            AttributeDecision::RuntimeGuarded
        );
        assert_eq!(
            classify_attribute(&registry, None, "raw_handle"),
            AttributeDecision::Rejected(RejectReason::ForbiddenAttribute)
        );
        assert_eq!(
            classify_attribute(&registry, None, "system"),
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        );
    }

    #[test]
    fn test_classify_method_call() {
        let registry = registry();
        assert!(matches!(
            classify_method_call(&registry, Some("Document"), "save"),
            AttributeDecision::Direct(_)
        ));
        assert_eq!(
            classify_method_call(&registry, Some("Document"), "title"),
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        );
        // `"abc".length()`: the mapping is a read, not a method
        assert_eq!(
            classify_method_call(&registry, Some("str"), "length"),
            AttributeDecision::Rejected(RejectReason::UnregisteredAttribute)
        );
        assert_eq!(
            classify_method_call(&registry, None, "upper"),
            AttributeDecision::RuntimeGuarded
        );
    }

    #[test]
    fn test_method_identity_checks() {
        let registry = registry();
        let symbols = ProgramSymbols::new();

        assert!(resolve_identity(&registry, &symbols, &CallableIdentity::method("Document", "save")).is_ok());
        assert_eq!(
            resolve_identity(&registry, &symbols, &CallableIdentity::method("Document", "title")),
            Err(RejectReason::UnregisteredAttribute)
        );
        assert_eq!(
            resolve_identity(&registry, &symbols, &CallableIdentity::method("str", "format")),
            Err(RejectReason::ForbiddenAttribute)
        );
    }

    #[test]
    fn test_imported_identity_requires_import() {
        let registry = registry();
        let symbols = ProgramSymbols::new();
        assert_eq!(
            resolve_identity(&registry, &symbols, &CallableIdentity::imported("fs", "read_text")),
            Err(RejectReason::UnknownModule)
        );
    }

    #[test]
    fn test_required_capabilities() {
        let registry = registry();
        let target = CallTarget::Module {
            module: "http".into(),
            name: "get".into(),
        };
        assert!(required_capabilities(&registry, &target).contains("net.http"));
        let save = CallTarget::Method {
            type_name: "Document".into(),
            name: "save".into(),
        };
        assert!(required_capabilities(&registry, &save).contains("file.write"));
    }
}
