//! Audit trail for access decisions and execution outcomes
//!
//! The sandbox reports every decision to an [`AuditSink`]. Persisting the
//! trail is left to the sink implementation; two are provided here:
//! - [`TracingAuditSink`] forwards records as `tracing` events
//! - [`MemoryAuditSink`] keeps records in memory for inspection

use crate::types::FileOperation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    FileAccess,
    Execution,
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Context attached to a file access decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessContext {
    pub reason: String,
    pub source: Option<String>,
    pub is_blocked: bool,
}

/// A single audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    FileAccess {
        path: String,
        operation: FileOperation,
        allowed: bool,
        context: FileAccessContext,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Event {
        category: AuditCategory,
        level: AuditLevel,
        message: String,
        context: serde_json::Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AuditRecord {
    pub fn message(&self) -> Option<&str> {
        match self {
            AuditRecord::Event { message, .. } => Some(message),
            AuditRecord::FileAccess { .. } => None,
        }
    }
}

/// Receiver of audit entries
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    /// Record an access decision
    fn log_file_access(
        &self,
        path: &str,
        operation: FileOperation,
        allowed: bool,
        context: &FileAccessContext,
    );

    /// Record a general audit event
    fn log(
        &self,
        category: AuditCategory,
        level: AuditLevel,
        message: &str,
        context: serde_json::Value,
    );
}

/// Audit sink that emits `tracing` events under the `toolgate::audit` target
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_file_access(
        &self,
        path: &str,
        operation: FileOperation,
        allowed: bool,
        context: &FileAccessContext,
    ) {
        if allowed {
            info!(
                target: "toolgate::audit",
                path,
                operation = %operation,
                allowed,
                reason = %context.reason,
                source = context.source.as_deref().unwrap_or("unknown"),
                "file access"
            );
        } else {
            warn!(
                target: "toolgate::audit",
                path,
                operation = %operation,
                allowed,
                blocked = context.is_blocked,
                reason = %context.reason,
                source = context.source.as_deref().unwrap_or("unknown"),
                "file access"
            );
        }
    }

    fn log(
        &self,
        category: AuditCategory,
        level: AuditLevel,
        message: &str,
        context: serde_json::Value,
    ) {
        match level {
            AuditLevel::Debug => {
                debug!(target: "toolgate::audit", ?category, %context, "{}", message)
            }
            AuditLevel::Info => {
                info!(target: "toolgate::audit", ?category, %context, "{}", message)
            }
            AuditLevel::Warn => {
                warn!(target: "toolgate::audit", ?category, %context, "{}", message)
            }
            AuditLevel::Error => {
                error!(target: "toolgate::audit", ?category, %context, "{}", message)
            }
        }
    }
}

/// Audit sink that keeps every record in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all records so far, oldest first
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Messages of general events, oldest first
    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| r.message().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_file_access(
        &self,
        path: &str,
        operation: FileOperation,
        allowed: bool,
        context: &FileAccessContext,
    ) {
        self.records.lock().push(AuditRecord::FileAccess {
            path: path.to_string(),
            operation,
            allowed,
            context: context.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn log(
        &self,
        category: AuditCategory,
        level: AuditLevel,
        message: &str,
        context: serde_json::Value,
    ) {
        self.records.lock().push(AuditRecord::Event {
            category,
            level,
            message: message.to_string(),
            context,
            timestamp: chrono::Utc::now(),
        });
    }
}
