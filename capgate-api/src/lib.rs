//! capgate-api: Shared types for the capgate script sandbox
//!
//! This crate defines the data model shared between a host application and
//! the access-control core that guards the scripts it embeds: capability
//! tokens and their constraints, whitelist entries, and the static
//! declaration format host types and modules use to expose their surface.
//!
//! Nothing here makes a decision on its own. The host crate combines these
//! types into contexts, registries and validators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// API version for compatibility checking of serialized grants
pub const API_VERSION: u32 = 1;

// ============================================================================
// Capability tokens
// ============================================================================

/// Optional restrictions attached to a capability token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Resource patterns the token covers (`*` and `?` wildcards)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_patterns: Option<BTreeSet<String>>,

    /// Operations the token allows (e.g. "read", "write")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_operations: Option<BTreeSet<String>>,

    /// Maximum number of authorized uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_usage_count: Option<u64>,

    /// Instant after which the token is no longer valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Constraints {
    /// Create an empty constraint set (no restrictions)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the token to resources matching any of the patterns
    pub fn with_resource_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the token to the listed operations
    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_operations = Some(operations.into_iter().map(Into::into).collect());
        self
    }

    /// Limit the number of authorized uses
    pub fn with_max_usage(mut self, max_usage_count: u64) -> Self {
        self.max_usage_count = Some(max_usage_count);
        self
    }

    /// Expire the token at the given instant
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether `resource` is covered by the resource patterns.
    ///
    /// A request that names no resource is only covered when the token
    /// carries no resource patterns at all.
    pub fn permits_resource(&self, resource: Option<&str>) -> bool {
        match (&self.resource_patterns, resource) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(patterns), Some(resource)) => {
                patterns.iter().any(|p| wildcard_match(p, resource))
            }
        }
    }

    /// Whether `operation` is in the allowed operation set.
    ///
    /// Same rule as resources: an unnamed operation only passes an
    /// unrestricted token.
    pub fn permits_operation(&self, operation: Option<&str>) -> bool {
        match (&self.allowed_operations, operation) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(allowed), Some(op)) => allowed.contains(op),
        }
    }
}

/// An unforgeable grant naming a permitted operation class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Capability type, e.g. "file.read" or "net.http"
    pub capability_type: String,

    /// Optional restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,

    /// Number of authorized operations attributed to this token
    #[serde(default)]
    pub usage_count: u64,
}

impl CapabilityToken {
    /// Create an unconstrained token
    pub fn new(capability_type: impl Into<String>) -> Self {
        Self {
            capability_type: capability_type.into(),
            constraints: None,
            usage_count: 0,
        }
    }

    /// Attach constraints
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Maximum usage count, if limited
    pub fn max_usage(&self) -> Option<u64> {
        self.constraints.as_ref().and_then(|c| c.max_usage_count)
    }

    /// Expiry instant, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.constraints.as_ref().and_then(|c| c.expires_at)
    }

    /// Whether the token has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }

    /// Whether the usage limit has been reached
    pub fn is_exhausted(&self) -> bool {
        self.max_usage().is_some_and(|max| self.usage_count >= max)
    }

    /// A token is valid iff it is neither expired nor exhausted
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.is_exhausted()
    }

    /// Validity against the current wall clock
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Whether the token's constraints cover a resource/operation pair
    pub fn permits(&self, resource: Option<&str>, operation: Option<&str>) -> bool {
        match &self.constraints {
            None => true,
            Some(c) => c.permits_resource(resource) && c.permits_operation(operation),
        }
    }

    /// Record one authorized use. Never decrements.
    pub fn record_use(&mut self) {
        self.usage_count = self.usage_count.saturating_add(1);
    }

    /// Stable fingerprint of the grant (type + constraints, not usage)
    pub fn fingerprint(&self) -> String {
        let encoded =
            rmp_serde::to_vec(&(&self.capability_type, &self.constraints)).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.capability_type.as_bytes());
        hasher.update(&encoded);
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    /// Script-facing snapshot of the token at `now`
    pub fn info_at(&self, now: DateTime<Utc>) -> TokenInfo {
        let constraints = self.constraints.clone().unwrap_or_default();
        TokenInfo {
            capability_type: self.capability_type.clone(),
            available: self.is_valid_at(now),
            patterns: constraints
                .resource_patterns
                .map(|p| p.into_iter().collect())
                .unwrap_or_default(),
            operations: constraints
                .allowed_operations
                .map(|o| o.into_iter().collect())
                .unwrap_or_default(),
            max_usage: constraints.max_usage_count,
            usage_count: self.usage_count,
            expires_at: constraints.expires_at,
        }
    }
}

/// Read-only description of a token as reported to scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(rename = "type")]
    pub capability_type: String,
    pub available: bool,
    pub patterns: Vec<String>,
    pub operations: Vec<String>,
    pub max_usage: Option<u64>,
    pub usage_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Match `candidate` against a pattern where `*` matches any run of
/// characters and `?` matches exactly one.
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ============================================================================
// Whitelist entries
// ============================================================================

/// How a registered attribute may be accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Callable member
    Method,
    /// Readable value
    Property,
    /// Explicitly denied; wins over any other registration
    Forbidden,
}

/// A whitelisted attribute of a host type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeAttribute {
    pub name: String,
    pub access_kind: AccessKind,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

impl SafeAttribute {
    fn with_kind(name: impl Into<String>, access_kind: AccessKind, description: &str) -> Self {
        Self {
            name: name.into(),
            access_kind,
            required_capabilities: BTreeSet::new(),
            description: description.to_string(),
        }
    }

    pub fn method(name: impl Into<String>, description: &str) -> Self {
        Self::with_kind(name, AccessKind::Method, description)
    }

    pub fn property(name: impl Into<String>, description: &str) -> Self {
        Self::with_kind(name, AccessKind::Property, description)
    }

    pub fn forbidden(name: impl Into<String>, description: &str) -> Self {
        Self::with_kind(name, AccessKind::Forbidden, description)
    }

    /// Require capabilities for access
    pub fn requiring<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn is_forbidden(&self) -> bool {
        self.access_kind == AccessKind::Forbidden
    }
}

/// A whitelisted builtin or module export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeFunction {
    pub name: String,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

impl SafeFunction {
    pub fn new(name: impl Into<String>, description: &str) -> Self {
        Self {
            name: name.into(),
            required_capabilities: BTreeSet::new(),
            description: description.to_string(),
        }
    }

    pub fn requiring<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }
}

/// Where a callable name was resolved from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionOrigin {
    Builtin,
    UserDefined,
    Imported { module: String },
}

impl fmt::Display for FunctionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::UserDefined => f.write_str("user-defined"),
            Self::Imported { module } => write!(f, "imported from {}", module),
        }
    }
}

/// Lexical scope within one compilation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

impl ScopeId {
    /// The top-level scope of every compilation unit
    pub const MODULE: ScopeId = ScopeId(0);
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

// ============================================================================
// Declaration format
// ============================================================================

/// One exposed member of a host type, declared at load time
#[derive(Debug, Clone, Copy)]
pub struct MemberDecl {
    pub name: &'static str,
    pub kind: AccessKind,
    pub requires: &'static [&'static str],
    pub description: &'static str,
}

impl MemberDecl {
    pub const fn method(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: AccessKind::Method,
            requires: &[],
            description,
        }
    }

    pub const fn property(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: AccessKind::Property,
            requires: &[],
            description,
        }
    }

    pub const fn forbidden(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: AccessKind::Forbidden,
            requires: &[],
            description,
        }
    }

    pub const fn requiring(self, requires: &'static [&'static str]) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            requires,
            description: self.description,
        }
    }
}

impl From<&MemberDecl> for SafeAttribute {
    fn from(decl: &MemberDecl) -> Self {
        SafeAttribute::with_kind(decl.name, decl.kind, decl.description)
            .requiring(decl.requires.iter().copied())
    }
}

/// The exposed surface of a host type
#[derive(Debug, Clone, Copy)]
pub struct TypeDecl {
    pub type_name: &'static str,
    pub members: &'static [MemberDecl],
}

/// A builtin or module export, declared at load time
#[derive(Debug, Clone, Copy)]
pub struct FunctionDecl {
    pub name: &'static str,
    pub requires: &'static [&'static str],
    pub description: &'static str,
}

impl FunctionDecl {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            requires: &[],
            description,
        }
    }

    pub const fn requiring(self, requires: &'static [&'static str]) -> Self {
        Self {
            name: self.name,
            requires,
            description: self.description,
        }
    }
}

impl From<&FunctionDecl> for SafeFunction {
    fn from(decl: &FunctionDecl) -> Self {
        SafeFunction::new(decl.name, decl.description).requiring(decl.requires.iter().copied())
    }
}

/// The exported surface of an importable module
#[derive(Debug, Clone, Copy)]
pub struct ModuleDecl {
    pub module_name: &'static str,
    pub exports: &'static [FunctionDecl],
}
