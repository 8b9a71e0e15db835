//! Runtime validator
//!
//! Generated code routes every call and attribute read through here:
//!
//! - statically resolved calls and reads, as planned by the codegen adapter
//!   ([`RuntimeValidator::call_resolved`], [`RuntimeValidator::get_resolved`])
//! - invoking a value (`call(f, x)`, `map(f, xs)`, `filter(f, xs)`)
//! - fetching an attribute by a runtime name, or fetching a method and
//!   invoking it later
//!
//! Each callable is re-resolved from its [`CallableIdentity`] with the same
//! decision functions the compiler used. An identity that does not resolve
//! to a registered builtin, a user function of this program, or an export
//! of a module this program imported raises a fatal [`SecurityError`]. Only
//! validated calls reach the host [`Dispatcher`].

use super::value::{CallableIdentity, CallableRef, Value};
use crate::audit;
use crate::codegen::{AttributeResolution, CallResolution};
use crate::decision::{self, AttributeDecision, CallTarget};
use crate::error::{RejectReason, ScriptError, SecurityError};
use crate::introspection::{is_introspection_function, Introspection};
use crate::registry::AccessRegistry;
use crate::sandbox::Sandbox;
use crate::unit::ProgramSymbols;
use capgate_api::AccessKind;
use std::sync::Arc;

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Host side of a validated call
///
/// Implementations execute builtins, user functions, module exports and
/// methods. They receive only targets the validator has already approved.
/// Host operations that touch a guarded resource should call
/// [`Sandbox::authorize`] with the concrete resource so the use is counted.
pub trait Dispatcher {
    fn dispatch(
        &mut self,
        sandbox: &mut Sandbox,
        target: &CallTarget,
        receiver: Option<&Value>,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError>;
}

#[derive(Debug, Clone)]
pub struct RuntimeValidator {
    registry: Arc<AccessRegistry>,
    symbols: Arc<ProgramSymbols>,
    max_depth: usize,
}

impl RuntimeValidator {
    pub fn new(registry: Arc<AccessRegistry>, symbols: Arc<ProgramSymbols>) -> Self {
        Self {
            registry,
            symbols,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit nesting of guarded higher-order calls
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn symbols(&self) -> &ProgramSymbols {
        &self.symbols
    }

    fn violation(&self, sandbox: &Sandbox, symbol: &str, reason: RejectReason) -> ScriptError {
        let err = SecurityError::new(symbol, reason);
        tracing::error!(
            sandbox = %sandbox.name(),
            symbol,
            reason = %reason,
            "Security violation on dynamic path"
        );
        sandbox.record(audit::security_violation(sandbox.name(), &err));
        ScriptError::Security(err)
    }

    /// Re-derive a callable's permission and check its capabilities
    pub fn check_callable(
        &self,
        sandbox: &Sandbox,
        callable: &CallableRef,
    ) -> Result<CallTarget, ScriptError> {
        let identity = &callable.identity;
        let target = decision::resolve_identity(&self.registry, &self.symbols, identity)
            .map_err(|reason| self.violation(sandbox, identity.symbol(), reason))?;

        if let CallTarget::Method { type_name, name } = &target {
            let bound_type = callable.receiver.as_deref().map(Value::type_name);
            if bound_type != Some(type_name.as_str()) {
                return Err(self.violation(sandbox, name, RejectReason::UnregisteredAttribute));
            }
        }

        for capability in decision::required_capabilities(&self.registry, &target) {
            sandbox.require(&capability)?;
        }
        Ok(target)
    }

    /// Invoke a callable value
    pub fn invoke(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        self.invoke_at(sandbox, dispatcher, callee, args, 0)
    }

    /// Invoke a builtin by name, for generated code that calls `call`,
    /// `map` or `filter` directly
    pub fn call_builtin(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let callee = Value::callable(CallableIdentity::builtin(name));
        self.invoke(sandbox, dispatcher, &callee, args)
    }

    /// Execute a call the compiler resolved.
    ///
    /// The resolution is turned back into a callable identity and checked
    /// like any dynamic call, so a planned `fs.read_text(...)` needs the
    /// same grants as `call(fs.read_text, ...)`. Method calls need the
    /// receiver.
    pub fn call_resolved(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        resolution: &CallResolution,
        receiver: Option<&Value>,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let identity = match resolution {
            CallResolution::Builtin { name } => CallableIdentity::builtin(name.clone()),
            CallResolution::User { scope, name } => CallableIdentity::user(*scope, name.clone()),
            CallResolution::Module { module, name } => {
                CallableIdentity::imported(module.clone(), name.clone())
            }
            CallResolution::Method(member) => {
                let Some(receiver) = receiver else {
                    return Err(ScriptError::runtime("method call without a receiver"));
                };
                return match member {
                    AttributeResolution::Direct { attribute, .. } => {
                        self.call_method_at(sandbox, dispatcher, receiver, &attribute.name, args, 0)
                    }
                    AttributeResolution::RuntimeGuarded { name } => {
                        self.call_method_at(sandbox, dispatcher, receiver, name, args, 0)
                    }
                    AttributeResolution::MappedCall { builtin } => Err(self.violation(
                        sandbox,
                        builtin,
                        RejectReason::UnregisteredAttribute,
                    )),
                    AttributeResolution::ModuleMember { module, name } => {
                        let callee = Value::callable(CallableIdentity::imported(module.clone(), name.clone()));
                        self.invoke_at(sandbox, dispatcher, &callee, args, 0)
                    }
                };
            }
        };
        self.invoke_at(sandbox, dispatcher, &Value::callable(identity), args, 0)
    }

    /// Execute an attribute read the compiler resolved
    pub fn get_resolved(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        object: &Value,
        resolution: &AttributeResolution,
        default: Value,
    ) -> Result<Value, ScriptError> {
        match resolution {
            AttributeResolution::Direct { attribute, .. } => {
                self.get_attr_at(sandbox, dispatcher, object, &attribute.name, default, 0)
            }
            AttributeResolution::RuntimeGuarded { name } => {
                self.get_attr_at(sandbox, dispatcher, object, name, default, 0)
            }
            AttributeResolution::MappedCall { builtin } => {
                let callee = Value::callable(CallableIdentity::builtin(builtin.clone()));
                self.invoke_at(sandbox, dispatcher, &callee, vec![object.clone()], 0)
            }
            // Checked when invoked
            AttributeResolution::ModuleMember { module, name } => Ok(Value::callable(
                CallableIdentity::imported(module.clone(), name.clone()),
            )),
        }
    }

    /// Call `receiver.name(args)` where the method is picked at runtime
    pub fn call_method(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        self.call_method_at(sandbox, dispatcher, receiver, name, args, 0)
    }

    fn call_method_at(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ScriptError> {
        let type_name = receiver.type_name().to_string();
        match decision::classify_method_call(&self.registry, Some(&type_name), name) {
            AttributeDecision::Direct(_) => {
                let callee = Value::Callable(CallableRef::bound(
                    CallableIdentity::method(type_name, name),
                    receiver.clone(),
                ));
                self.invoke_at(sandbox, dispatcher, &callee, args, depth)
            }
            AttributeDecision::Rejected(reason) => Err(self.violation(sandbox, name, reason)),
            AttributeDecision::Mapped { .. } | AttributeDecision::RuntimeGuarded => {
                Err(self.violation(sandbox, name, RejectReason::UnregisteredAttribute))
            }
        }
    }

    fn invoke_at(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        callee: &Value,
        mut args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ScriptError> {
        if depth > self.max_depth {
            return Err(ScriptError::DepthExceeded(self.max_depth));
        }
        let Value::Callable(callable) = callee else {
            return Err(ScriptError::NotCallable {
                type_name: callee.type_name().to_string(),
            });
        };
        let target = self.check_callable(sandbox, callable)?;
        tracing::trace!(target = ?target, depth, "Validated dynamic call");

        match &target {
            CallTarget::Builtin { name } if name == "call" => {
                if args.is_empty() {
                    return Err(ScriptError::runtime("call() requires a callable"));
                }
                let inner = args.remove(0);
                self.invoke_at(sandbox, dispatcher, &inner, args, depth + 1)
            }
            CallTarget::Builtin { name } if name == "map" || name == "filter" => {
                let keep_only_truthy = name == "filter";
                let mut args = args.into_iter();
                let (Some(func), Some(Value::List(items))) = (args.next(), args.next()) else {
                    return Err(ScriptError::runtime(format!("{}() requires a callable and a list", name)));
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let result = self.invoke_at(sandbox, dispatcher, &func, vec![item.clone()], depth + 1)?;
                    if !keep_only_truthy {
                        out.push(result);
                    } else if result.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::List(out))
            }
            CallTarget::Builtin { name } if is_introspection_function(name) => {
                Ok(Introspection::new(sandbox).call(name, &args).unwrap_or_default())
            }
            _ => dispatcher.dispatch(sandbox, &target, callable.receiver.as_deref(), args),
        }
    }

    /// Fetch `object.<name>` where `name` is only known at runtime.
    ///
    /// A registered property absent from the instance yields `default`.
    /// Methods come back as bound callables, re-checked when invoked.
    pub fn get_attr(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        object: &Value,
        name: &str,
        default: Value,
    ) -> Result<Value, ScriptError> {
        self.get_attr_at(sandbox, dispatcher, object, name, default, 0)
    }

    fn get_attr_at(
        &self,
        sandbox: &mut Sandbox,
        dispatcher: &mut dyn Dispatcher,
        object: &Value,
        name: &str,
        default: Value,
        depth: usize,
    ) -> Result<Value, ScriptError> {
        let type_name = object.type_name().to_string();
        match decision::classify_attribute(&self.registry, Some(&type_name), name) {
            AttributeDecision::Direct(attr) => {
                for capability in &attr.required_capabilities {
                    sandbox.require(capability)?;
                }
                match attr.access_kind {
                    AccessKind::Method => Ok(Value::Callable(CallableRef::bound(
                        CallableIdentity::method(type_name, name),
                        object.clone(),
                    ))),
                    AccessKind::Property => Ok(match object {
                        Value::Object(obj) => obj.fields.get(name).cloned().unwrap_or(default),
                        _ => default,
                    }),
                    AccessKind::Forbidden => {
                        Err(self.violation(sandbox, name, RejectReason::ForbiddenAttribute))
                    }
                }
            }
            // Rewritten to `builtin(object)`, one level deeper
            AttributeDecision::Mapped { builtin } => {
                let callee = Value::callable(CallableIdentity::builtin(builtin));
                self.invoke_at(sandbox, dispatcher, &callee, vec![object.clone()], depth + 1)
            }
            AttributeDecision::Rejected(reason) => Err(self.violation(sandbox, name, reason)),
            AttributeDecision::RuntimeGuarded => {
                Err(self.violation(sandbox, name, RejectReason::UnregisteredAttribute))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::runtime::HostObject;
    use crate::registry::RegistryPresets;
    use capgate_api::{CapabilityToken, MemberDecl, SafeAttribute, ScopeId, TypeDecl};

    const DOCUMENT: TypeDecl = TypeDecl {
        type_name: "Document",
        members: &[
            MemberDecl::property("title", "Title"),
            MemberDecl::property("author", "Author"),
            MemberDecl::method("save", "Save").requiring(&["file.write"]),
            MemberDecl::forbidden("raw_handle", "Native handle"),
        ],
    };

    /// Executes a handful of builtins, records everything it is asked to run
    #[derive(Default)]
    struct Recorder {
        calls: Vec<CallTarget>,
    }

    impl Dispatcher for Recorder {
        fn dispatch(
            &mut self,
            _sandbox: &mut Sandbox,
            target: &CallTarget,
            receiver: Option<&Value>,
            args: Vec<Value>,
        ) -> Result<Value, ScriptError> {
            self.calls.push(target.clone());
            match (target.name(), receiver, args.first()) {
                ("len", _, Some(Value::Str(s))) => Ok(Value::Int(s.len() as i64)),
                ("upper", Some(Value::Str(s)), _) => Ok(Value::Str(s.to_uppercase())),
                ("is_even", _, Some(Value::Int(i))) => Ok(Value::Bool(i % 2 == 0)),
                _ => Ok(Value::None),
            }
        }
    }

    fn setup() -> (Sandbox, RuntimeValidator) {
        let registry = Arc::new(RegistryPresets::standard_builder().declare_type(&DOCUMENT).build());
        let mut symbols = ProgramSymbols::new();
        symbols.define_function(ScopeId::MODULE, "is_even").unwrap();
        symbols
            .import_module(&registry, ScopeId::MODULE, "fs", None)
            .unwrap();
        let sandbox = Sandbox::new("test", Arc::clone(&registry));
        (sandbox, RuntimeValidator::new(registry, Arc::new(symbols)))
    }

    #[test]
    fn test_native_callable_is_security_error() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let forbidden = Value::callable(CallableIdentity::native("os_system"));

        let err = validator
            .call_builtin(&mut sb, &mut host, "call", vec![forbidden, Value::from("payload")])
            .unwrap_err();
        assert!(err.is_security_violation());
        assert!(!err.is_catchable());
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_user_function_through_filter() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let is_even = Value::callable(CallableIdentity::user(ScopeId::MODULE, "is_even"));
        let items = Value::List((1..=4).map(Value::Int).collect());

        let result = validator
            .call_builtin(&mut sb, &mut host, "filter", vec![is_even, items])
            .unwrap();
        assert_eq!(result, Value::List(vec![Value::Int(2), Value::Int(4)]));
    }

    #[test]
    fn test_map_over_builtin() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let len = Value::callable(CallableIdentity::builtin("len"));
        let items = Value::List(vec![Value::from("a"), Value::from("abc")]);

        let result = validator
            .call_builtin(&mut sb, &mut host, "map", vec![len, items])
            .unwrap();
        assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(3)]));
    }

    #[test]
    fn test_user_function_from_other_scope_rejected() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let forged = Value::callable(CallableIdentity::user(ScopeId(7), "is_even"));

        let err = validator.invoke(&mut sb, &mut host, &forged, vec![]).unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_module_export_requires_capability() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let read = Value::callable(CallableIdentity::imported("fs", "read_text"));

        let err = validator
            .invoke(&mut sb, &mut host, &read, vec![Value::from("a.txt")])
            .unwrap_err();
        assert!(err.is_catchable());

        sb.grant(CapabilityToken::new("file.read"));
        assert!(validator.invoke(&mut sb, &mut host, &read, vec![Value::from("a.txt")]).is_ok());
    }

    #[test]
    fn test_non_imported_module_rejected() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let get = Value::callable(CallableIdentity::imported("http", "get"));
        sb.grant(CapabilityToken::new("net.http"));

        let err = validator.invoke(&mut sb, &mut host, &get, vec![]).unwrap_err();
        assert_eq!(
            err,
            ScriptError::Security(SecurityError::new("get", RejectReason::UnknownModule))
        );
    }

    #[test]
    fn test_get_attr_paths() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let doc = Value::Object(HostObject::new("Document", 1).with_field("title", Value::from("Q3")));

        let title = validator
            .get_attr(&mut sb, &mut host, &doc, "title", Value::None)
            .unwrap();
        assert_eq!(title, Value::from("Q3"));

        // Registered but absent on this instance
        let author = validator
            .get_attr(&mut sb, &mut host, &doc, "author", Value::from("unknown"))
            .unwrap();
        assert_eq!(author, Value::from("unknown"));

        let err = validator
            .get_attr(&mut sb, &mut host, &doc, "raw_handle", Value::None)
            .unwrap_err();
        assert!(err.is_security_violation());

        let err = validator
            .get_attr(&mut sb, &mut host, &doc, "__dict__", Value::None)
            .unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_fetched_method_is_rechecked_on_invoke() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();

        let upper = validator
            .get_attr(&mut sb, &mut host, &Value::from("abc"), "upper", Value::None)
            .unwrap();
        let result = validator.invoke(&mut sb, &mut host, &upper, vec![]).unwrap();
        assert_eq!(result, Value::from("ABC"));

        // Same identity bound to a receiver of another type
        let forged = Value::Callable(CallableRef::bound(
            CallableIdentity::method("str", "upper"),
            Value::Int(1),
        ));
        assert!(validator
            .invoke(&mut sb, &mut host, &forged, vec![])
            .unwrap_err()
            .is_security_violation());
    }

    #[test]
    fn test_mapped_length() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let len = validator
            .get_attr(&mut sb, &mut host, &Value::from("abcd"), "length", Value::None)
            .unwrap();
        assert_eq!(len, Value::Int(4));
    }

    #[test]
    fn test_method_requiring_capability() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let doc = Value::Object(HostObject::new("Document", 1));

        let err = validator
            .get_attr(&mut sb, &mut host, &doc, "save", Value::None)
            .unwrap_err();
        assert!(err.is_catchable());
    }

    #[test]
    fn test_introspection_through_call() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        sb.grant(CapabilityToken::new("net.http"));
        let has = Value::callable(CallableIdentity::builtin("has_capability"));

        let result = validator
            .call_builtin(&mut sb, &mut host, "call", vec![has, Value::from("net.http")])
            .unwrap();
        assert_eq!(result, Value::Bool(true));
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let (mut sb, validator) = setup();
        let validator = validator.with_max_depth(2);
        let mut host = Recorder::default();
        let call = Value::callable(CallableIdentity::builtin("call"));
        let len = Value::callable(CallableIdentity::builtin("len"));

        let err = validator
            .invoke(&mut sb, &mut host, &call, vec![call.clone(), call.clone(), call.clone(), len])
            .unwrap_err();
        assert_eq!(err, ScriptError::DepthExceeded(2));
    }

    #[test]
    fn test_not_callable() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let err = validator
            .invoke(&mut sb, &mut host, &Value::Int(3), vec![])
            .unwrap_err();
        assert!(matches!(err, ScriptError::NotCallable { .. }));
    }

    #[test]
    fn test_resolved_module_call_needs_same_grant_as_indirect() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let planned = CallResolution::Module {
            module: "fs".into(),
            name: "read_text".into(),
        };
        let args = || vec![Value::from("secret.txt")];

        let direct = validator
            .call_resolved(&mut sb, &mut host, &planned, None, args())
            .unwrap_err();
        let indirect = validator
            .invoke(
                &mut sb,
                &mut host,
                &Value::callable(CallableIdentity::imported("fs", "read_text")),
                args(),
            )
            .unwrap_err();
        assert_eq!(
            direct,
            ScriptError::Capability(CapabilityError::Missing("file.read".into()))
        );
        assert_eq!(direct, indirect);
        assert!(host.calls.is_empty());

        sb.grant(CapabilityToken::new("file.read"));
        validator
            .call_resolved(&mut sb, &mut host, &planned, None, args())
            .unwrap();
        assert_eq!(host.calls.len(), 1);
    }

    #[test]
    fn test_resolved_method_call() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let save = CallResolution::Method(AttributeResolution::Direct {
            type_name: "Document".into(),
            attribute: SafeAttribute::method("save", "Save"),
        });
        let doc = Value::Object(HostObject::new("Document", 1));

        let err = validator
            .call_resolved(&mut sb, &mut host, &save, Some(&doc), vec![])
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::Capability(CapabilityError::Missing("file.write".into()))
        );

        // The receiver's real type decides, not the planned one
        let err = validator
            .call_resolved(&mut sb, &mut host, &save, Some(&Value::from("abc")), vec![])
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::Security(SecurityError::new("save", RejectReason::UnregisteredAttribute))
        );

        sb.grant(CapabilityToken::new("file.write"));
        validator
            .call_resolved(&mut sb, &mut host, &save, Some(&doc), vec![])
            .unwrap();
        assert_eq!(
            host.calls,
            vec![CallTarget::Method {
                type_name: "Document".into(),
                name: "save".into()
            }]
        );
    }

    #[test]
    fn test_resolved_attribute_reads() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();
        let text = Value::from("abcd");

        let len = validator
            .get_resolved(
                &mut sb,
                &mut host,
                &text,
                &AttributeResolution::MappedCall {
                    builtin: "len".into(),
                },
                Value::None,
            )
            .unwrap();
        assert_eq!(len, Value::Int(4));

        let guarded = AttributeResolution::RuntimeGuarded {
            name: "raw_handle".into(),
        };
        let err = validator
            .get_resolved(
                &mut sb,
                &mut host,
                &Value::Object(HostObject::new("Document", 2)),
                &guarded,
                Value::None,
            )
            .unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_called_mapped_attribute_rejected() {
        let (mut sb, validator) = setup();
        let mut host = Recorder::default();

        let err = validator
            .call_method(&mut sb, &mut host, &Value::from("abc"), "length", vec![])
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::Security(SecurityError::new("length", RejectReason::UnregisteredAttribute))
        );
        assert!(host.calls.is_empty());

        let upper = validator
            .call_method(&mut sb, &mut host, &Value::from("abc"), "upper", vec![])
            .unwrap();
        assert_eq!(upper, Value::from("ABC"));
    }

    #[test]
    fn test_mapped_read_counts_toward_depth() {
        let (mut sb, validator) = setup();
        let validator = validator.with_max_depth(0);
        let mut host = Recorder::default();
        let text = Value::from("abc");

        let err = validator
            .get_attr(&mut sb, &mut host, &text, "length", Value::None)
            .unwrap_err();
        assert_eq!(err, ScriptError::DepthExceeded(0));

        let len = Value::callable(CallableIdentity::builtin("len"));
        assert_eq!(
            validator.invoke(&mut sb, &mut host, &len, vec![text]).unwrap(),
            Value::Int(3)
        );
    }
}
