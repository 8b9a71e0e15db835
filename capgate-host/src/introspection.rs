//! Script-facing capability queries
//!
//! These never grant and never fail: with no sandbox, or for an unknown
//! capability, they answer `false`, an empty list or `null`.

use crate::runtime::Value;
use crate::sandbox::Sandbox;
use capgate_api::TokenInfo;

/// Builtins answered here rather than by the host dispatcher
pub const INTROSPECTION_FUNCTIONS: &[&str] = &["has_capability", "list_capabilities", "capability_info"];

pub fn is_introspection_function(name: &str) -> bool {
    INTROSPECTION_FUNCTIONS.contains(&name)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Introspection<'a> {
    sandbox: Option<&'a Sandbox>,
}

impl<'a> Introspection<'a> {
    pub fn new(sandbox: &'a Sandbox) -> Self {
        Self {
            sandbox: Some(sandbox),
        }
    }

    /// Queries with no active context
    pub fn detached() -> Self {
        Self { sandbox: None }
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.sandbox.is_some_and(|sb| sb.has_capability(name))
    }

    pub fn list_capabilities(&self) -> Vec<String> {
        let mut caps = self.sandbox.map(Sandbox::capabilities).unwrap_or_default();
        caps.sort();
        caps
    }

    /// Nearest token of that type; a spent token is reported with
    /// `available: false`
    pub fn capability_info(&self, name: &str) -> Option<TokenInfo> {
        self.sandbox.and_then(|sb| sb.describe_capability(name))
    }

    /// Evaluate an introspection builtin; `None` if `function` is not one
    pub fn call(&self, function: &str, args: &[Value]) -> Option<Value> {
        let name = args.first().and_then(Value::as_str);
        let value = match function {
            "has_capability" => Value::Bool(name.is_some_and(|n| self.has_capability(n))),
            "list_capabilities" => {
                Value::List(self.list_capabilities().into_iter().map(Value::Str).collect())
            }
            "capability_info" => name
                .and_then(|n| self.capability_info(n))
                .and_then(|info| serde_json::to_value(info).ok())
                .map(Value::from)
                .unwrap_or(Value::None),
            _ => return None,
        };
        Some(value)
    }
}
