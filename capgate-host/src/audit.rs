//! Audit trail for capability and whitelist events
//!
//! Every grant, revocation, authorized use, denial, scope change and
//! rejected access can be forwarded to an [`AuditSink`]. Hosts pick a sink
//! (JSONL file, memory, null, or several at once) or implement their own.

use crate::context::AccessRequest;
use crate::error::{CapabilityError, CompileError, RejectReason, SecurityError};
use capgate_api::CapabilityToken;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// One auditable action
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Sandbox (or compilation unit) the event belongs to
    pub sandbox: String,
    /// Context label, when the event concerns one context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, sandbox: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            sandbox: sandbox.into(),
            context: None,
            details,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CapabilityGranted,
    CapabilityRevoked,
    /// An operation was authorized and counted against a token
    CapabilityUsed,
    CapabilityDenied,
    ScopeEntered,
    ScopeExited,
    CompileRejected,
    SecurityViolation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Capability {
        capability: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Scope {
        label: String,
        depth: usize,
    },
    Access {
        symbol: String,
        reason: RejectReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<u32>,
    },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Destination for audit events
///
/// # Example
///
/// ```rust
/// use capgate_host::audit::{AuditError, AuditEvent, AuditSink};
///
/// struct StderrSink;
///
/// impl AuditSink for StderrSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         eprintln!("{:?} {}", event.event_type, event.sandbox);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError>;
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }

    fn flush(&self) -> Result<(), AuditError> {
        (**self).flush()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Appends one JSON object per line; parent directories are created
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn writer(&self) -> MutexGuard<'_, BufWriter<File>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(&event)?;
        writeln!(self.writer(), "{}", line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.writer().flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink").field("path", &self.path).finish()
    }
}

/// Keeps the most recent `capacity` events
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.matching(|_| true)
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.matching(|e| e.event_type == event_type)
    }

    pub fn find_by_sandbox(&self, sandbox: &str) -> Vec<AuditEvent> {
        self.matching(|e| e.sandbox == sandbox)
    }

    fn matching(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Forwards every event to each inner sink in order; stops at the first error
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.sinks.iter().try_for_each(|sink| sink.record(event.clone()))
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.sinks.iter().try_for_each(|sink| sink.flush())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Event constructors
// ============================================================================

fn capability_details(capability: &str) -> AuditDetails {
    AuditDetails::Capability {
        capability: capability.to_string(),
        fingerprint: None,
        resource: None,
        operation: None,
        reason: None,
    }
}

pub fn capability_granted(sandbox: &str, token: &CapabilityToken) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilityGranted,
        sandbox,
        AuditDetails::Capability {
            capability: token.capability_type.clone(),
            fingerprint: Some(token.fingerprint()),
            resource: None,
            operation: None,
            reason: None,
        },
    )
}

pub fn capability_revoked(sandbox: &str, capability: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilityRevoked,
        sandbox,
        capability_details(capability),
    )
}

pub fn capability_used(sandbox: &str, request: &AccessRequest) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilityUsed,
        sandbox,
        AuditDetails::Capability {
            capability: request.capability_type.clone(),
            fingerprint: None,
            resource: request.resource.clone(),
            operation: request.operation.clone(),
            reason: None,
        },
    )
}

pub fn capability_denied(sandbox: &str, request: &AccessRequest, err: &CapabilityError) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilityDenied,
        sandbox,
        AuditDetails::Capability {
            capability: request.capability_type.clone(),
            fingerprint: None,
            resource: request.resource.clone(),
            operation: request.operation.clone(),
            reason: Some(err.to_string()),
        },
    )
}

pub fn scope_entered(sandbox: &str, label: &str, depth: usize) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::ScopeEntered,
        sandbox,
        AuditDetails::Scope {
            label: label.to_string(),
            depth,
        },
    )
}

pub fn scope_exited(sandbox: &str, label: &str, depth: usize) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::ScopeExited,
        sandbox,
        AuditDetails::Scope {
            label: label.to_string(),
            depth,
        },
    )
}

pub fn compile_rejected(unit: &str, err: &CompileError) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CompileRejected,
        unit,
        AuditDetails::Access {
            symbol: err.symbol.clone(),
            reason: err.reason,
            node: Some(err.node.0),
        },
    )
}

pub fn security_violation(sandbox: &str, err: &SecurityError) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::SecurityViolation,
        sandbox,
        AuditDetails::Access {
            symbol: err.symbol.clone(),
            reason: err.reason,
            node: None,
        },
    )
}
