//! Capability contexts
//!
//! Contexts form a tree: each one has at most one parent, fixed at creation,
//! and owns tokens keyed by capability type. A context's effective
//! capabilities are its own valid tokens plus those of its ancestors. Grants
//! flow down only.
//!
//! ```text
//!   root ──── { net.http }
//!     │
//!     ├── child A ──── { file.read (*.txt, max 2) }
//!     │     └── grandchild ──── { }          sees net.http, file.read
//!     └── child B ──── { }                   sees net.http only
//! ```
//!
//! Contexts live in a [`ContextArena`] addressed by generational
//! [`ContextId`] handles, so a destroyed context can never be reached again
//! through a stale handle and the structure stays acyclic.
//!
//! Lookups never fail: absence is `false`, an empty set, or `None`.

use crate::error::{CapabilityError, ContextError};
use capgate_api::{CapabilityToken, TokenInfo};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Handle to a context in a [`ContextArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}.{}", self.index, self.generation)
    }
}

/// Anything that can answer "is this capability currently held?"
///
/// Implemented by [`Sandbox`](crate::sandbox::Sandbox) for its current
/// context, by [`ContextView`] for an arbitrary context, and by
/// [`NoCapabilities`].
pub trait CapabilitySource {
    fn has_capability(&self, capability_type: &str) -> bool;
}

/// A source that holds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilitySource for NoCapabilities {
    fn has_capability(&self, _capability_type: &str) -> bool {
        false
    }
}

/// Borrowed view of one context, including its ancestors
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    arena: &'a ContextArena,
    id: ContextId,
}

impl CapabilitySource for ContextView<'_> {
    fn has_capability(&self, capability_type: &str) -> bool {
        self.arena.has_capability(self.id, capability_type, true)
    }
}

/// A request to use a capability for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub capability_type: String,
    pub resource: Option<String>,
    pub operation: Option<String>,
}

impl AccessRequest {
    pub fn new(capability_type: impl Into<String>) -> Self {
        Self {
            capability_type: capability_type.into(),
            resource: None,
            operation: None,
        }
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

#[derive(Debug)]
struct ContextNode {
    label: String,
    parent: Option<ContextId>,
    children: Vec<ContextId>,
    tokens: HashMap<String, CapabilityToken>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<ContextNode>,
}

/// Owner of a tree (or forest) of capability contexts
#[derive(Debug, Default)]
pub struct ContextArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ContextArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with no parent
    pub fn create_root(&mut self, label: impl Into<String>) -> ContextId {
        self.alloc(ContextNode {
            label: label.into(),
            parent: None,
            children: Vec::new(),
            tokens: HashMap::new(),
        })
    }

    /// Create a child of `parent`
    pub fn create_child(
        &mut self,
        parent: ContextId,
        label: impl Into<String>,
    ) -> Result<ContextId, ContextError> {
        if !self.contains(parent) {
            return Err(ContextError::Stale(parent));
        }
        let id = self.alloc(ContextNode {
            label: label.into(),
            parent: Some(parent),
            children: Vec::new(),
            tokens: HashMap::new(),
        });
        if let Some(node) = self.node_mut(parent) {
            node.children.push(id);
        }
        Ok(id)
    }

    fn alloc(&mut self, node: ContextNode) -> ContextId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            ContextId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            ContextId {
                index,
                generation: 0,
            }
        }
    }

    fn node(&self, id: ContextId) -> Option<&ContextNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: ContextId) -> Option<&mut ContextNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Whether the handle still refers to a live context
    pub fn contains(&self, id: ContextId) -> bool {
        self.node(id).is_some()
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn label(&self, id: ContextId) -> Option<&str> {
        self.node(id).map(|n| n.label.as_str())
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// View a context as a [`CapabilitySource`]
    pub fn view(&self, id: ContextId) -> ContextView<'_> {
        ContextView { arena: self, id }
    }

    /// Destroy a context and everything nested inside it.
    ///
    /// Ancestors and siblings are untouched. Returns how many contexts were
    /// destroyed (0 for a stale handle).
    pub fn destroy(&mut self, id: ContextId) -> usize {
        let Some(parent) = self.node(id).map(|n| n.parent) else {
            return 0;
        };
        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|c| *c != id);
        }

        let mut destroyed = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let Some(slot) = self.slots.get_mut(next.index as usize) else {
                continue;
            };
            if slot.generation != next.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(next.index);
                self.live -= 1;
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Insert or replace the token for its capability type in `ctx` only
    pub fn add_capability(
        &mut self,
        ctx: ContextId,
        token: CapabilityToken,
    ) -> Result<Option<CapabilityToken>, ContextError> {
        let node = self.node_mut(ctx).ok_or(ContextError::Stale(ctx))?;
        Ok(node.tokens.insert(token.capability_type.clone(), token))
    }

    /// Remove the token of a type from `ctx` only
    pub fn remove_capability(
        &mut self,
        ctx: ContextId,
        capability_type: &str,
    ) -> Option<CapabilityToken> {
        self.node_mut(ctx)
            .and_then(|n| n.tokens.remove(capability_type))
    }

    /// `ctx` followed by its ancestors, nearest first
    fn lineage(&self, ctx: ContextId) -> Lineage<'_> {
        Lineage {
            arena: self,
            next: Some(ctx),
        }
    }

    fn tokens_of<'a>(
        &'a self,
        ctx: ContextId,
        capability_type: &'a str,
        check_parents: bool,
    ) -> impl Iterator<Item = &'a CapabilityToken> + 'a {
        let depth = if check_parents { usize::MAX } else { 1 };
        self.lineage(ctx)
            .take(depth)
            .filter_map(move |(_, node)| node.tokens.get(capability_type))
    }

    pub fn has_capability(&self, ctx: ContextId, capability_type: &str, check_parents: bool) -> bool {
        self.has_capability_at(ctx, capability_type, check_parents, Utc::now())
    }

    pub fn has_capability_at(
        &self,
        ctx: ContextId,
        capability_type: &str,
        check_parents: bool,
        now: DateTime<Utc>,
    ) -> bool {
        self.tokens_of(ctx, capability_type, check_parents)
            .any(|t| t.is_valid_at(now))
    }

    /// Types of all valid tokens visible from `ctx`
    pub fn get_all_capabilities(&self, ctx: ContextId, include_parents: bool) -> BTreeSet<String> {
        let now = Utc::now();
        let depth = if include_parents { usize::MAX } else { 1 };
        self.lineage(ctx)
            .take(depth)
            .flat_map(|(_, node)| node.tokens.values())
            .filter(|t| t.is_valid_at(now))
            .map(|t| t.capability_type.clone())
            .collect()
    }

    /// The nearest valid token of a type
    pub fn get_capability_info(&self, ctx: ContextId, capability_type: &str) -> Option<TokenInfo> {
        let now = Utc::now();
        self.tokens_of(ctx, capability_type, true)
            .find(|t| t.is_valid_at(now))
            .map(|t| t.info_at(now))
    }

    /// The nearest valid token of a type, or failing that the nearest token
    /// of that type at all (reported as unavailable)
    pub fn describe_capability(&self, ctx: ContextId, capability_type: &str) -> Option<TokenInfo> {
        let now = Utc::now();
        self.get_capability_info(ctx, capability_type).or_else(|| {
            self.tokens_of(ctx, capability_type, true)
                .next()
                .map(|t| t.info_at(now))
        })
    }

    /// Authorize one operation and attribute it to a token.
    ///
    /// Walks from `ctx` outwards and uses the nearest token that is valid and
    /// whose constraints cover the request. Its usage count is incremented
    /// exactly once. When nothing qualifies, the failure of the nearest
    /// candidate is reported.
    pub fn authorize(
        &mut self,
        ctx: ContextId,
        request: &AccessRequest,
    ) -> Result<TokenInfo, CapabilityError> {
        let now = Utc::now();
        let capability = request.capability_type.as_str();
        let mut failure: Option<CapabilityError> = None;
        let mut holder: Option<ContextId> = None;

        for (id, node) in self.lineage(ctx) {
            let Some(token) = node.tokens.get(capability) else {
                continue;
            };
            let rejection = if token.is_expired_at(now) {
                Some(CapabilityError::Expired(capability.to_string()))
            } else if token.is_exhausted() {
                Some(CapabilityError::Exhausted {
                    capability: capability.to_string(),
                    max_usage: token.max_usage().unwrap_or_default(),
                })
            } else if !token
                .constraints
                .as_ref()
                .map_or(true, |c| c.permits_resource(request.resource.as_deref()))
            {
                Some(CapabilityError::ResourceDenied {
                    capability: capability.to_string(),
                    resource: request.resource.clone().unwrap_or_default(),
                })
            } else if !token.permits(request.resource.as_deref(), request.operation.as_deref()) {
                Some(CapabilityError::OperationDenied {
                    capability: capability.to_string(),
                    operation: request.operation.clone().unwrap_or_default(),
                })
            } else {
                None
            };

            match rejection {
                None => {
                    holder = Some(id);
                    break;
                }
                Some(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        let token = holder
            .and_then(|id| self.node_mut(id))
            .and_then(|node| node.tokens.get_mut(capability));
        match token {
            Some(token) => {
                token.record_use();
                Ok(token.info_at(now))
            }
            None => Err(failure.unwrap_or_else(|| CapabilityError::Missing(capability.to_string()))),
        }
    }
}

struct Lineage<'a> {
    arena: &'a ContextArena,
    next: Option<ContextId>,
}

impl<'a> Iterator for Lineage<'a> {
    type Item = (ContextId, &'a ContextNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.arena.node(id)?;
        self.next = node.parent;
        Some((id, node))
    }
}
