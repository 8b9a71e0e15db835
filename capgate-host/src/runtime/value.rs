//! Script values as seen by the runtime validator
//!
//! Callables carry an explicit [`CallableIdentity`]. The validator never
//! invokes a callable by trusting the value itself; it re-derives the
//! identity's permission from the registry and the program's symbols.

use capgate_api::ScopeId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Who a callable value claims to be
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallableIdentity {
    Builtin { name: String },
    User { scope: ScopeId, name: String },
    Imported { module: String, name: String },
    /// A method of a host type, bound to a receiver
    Method { type_name: String, name: String },
    /// A raw host primitive that leaked into a value
    Native { symbol: String },
}

impl CallableIdentity {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self::Builtin { name: name.into() }
    }

    pub fn user(scope: ScopeId, name: impl Into<String>) -> Self {
        Self::User {
            scope,
            name: name.into(),
        }
    }

    pub fn imported(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Imported {
            module: module.into(),
            name: name.into(),
        }
    }

    pub fn method(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Method {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    pub fn native(symbol: impl Into<String>) -> Self {
        Self::Native {
            symbol: symbol.into(),
        }
    }

    /// The bare name a direct call would have used
    pub fn symbol(&self) -> &str {
        match self {
            Self::Builtin { name }
            | Self::User { name, .. }
            | Self::Imported { name, .. }
            | Self::Method { name, .. } => name,
            Self::Native { symbol } => symbol,
        }
    }
}

impl fmt::Display for CallableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin { name } => write!(f, "builtin {}", name),
            Self::User { scope, name } => write!(f, "{} in {}", name, scope),
            Self::Imported { module, name } => write!(f, "{}.{}", module, name),
            Self::Method { type_name, name } => write!(f, "{}.{}", type_name, name),
            Self::Native { symbol } => write!(f, "native {}", symbol),
        }
    }
}

/// A callable value, optionally bound to a receiver
#[derive(Debug, Clone, PartialEq)]
pub struct CallableRef {
    pub identity: CallableIdentity,
    pub receiver: Option<Box<Value>>,
}

impl CallableRef {
    pub fn new(identity: CallableIdentity) -> Self {
        Self {
            identity,
            receiver: None,
        }
    }

    pub fn bound(identity: CallableIdentity, receiver: Value) -> Self {
        Self {
            identity,
            receiver: Some(Box::new(receiver)),
        }
    }
}

/// An opaque host object exposed to scripts under a registered type name
#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    pub type_name: String,
    pub handle: u64,
    /// Property values the host chose to expose
    pub fields: BTreeMap<String, Value>,
}

impl HostObject {
    pub fn new(type_name: impl Into<String>, handle: u64) -> Self {
        Self {
            type_name: type_name.into(),
            handle,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Callable(CallableRef),
    Object(HostObject),
}

impl Value {
    /// Host type name used for registry lookups
    pub fn type_name(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Callable(_) => "callable",
            Self::Object(obj) => &obj.type_name,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Dict(map) => !map.is_empty(),
            Self::Callable(_) | Self::Object(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn callable(identity: CallableIdentity) -> Self {
        Self::Callable(CallableRef::new(identity))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
