//! Toolgate Core Library
//!
//! This crate mediates every file access and tool invocation an autonomous
//! agent attempts:
//! - Path validation (traversal, encoded traversal, blocked system paths)
//! - A directory allow-list with expiring grants and human consent
//! - Gated file operations with size limits and timeouts
//! - Sandboxed tool execution with concurrency, timeout and cancellation
//! - An audit trail of every decision
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      toolgate-core                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  sandbox/      - Validator, registry, consent, gateway,     │
//! │                  execution sandbox, terminal executor       │
//! │  audit.rs      - Audit sinks                                │
//! │  config.rs     - Sandbox configuration                      │
//! │  types/        - Shared type definitions                    │
//! │  error.rs      - Error types                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod sandbox;
pub mod types;

// Re-export commonly used types
pub use error::{Error, ErrorCode, Result};
pub use types::*;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::SandboxConfig;

// Re-export sandbox components
pub use sandbox::{
    AccessOptions, AccessRegistry, AutoDenyGate, ConsentDecision, ConsentGate, ConsentRequest,
    ExecuteOptions, ExecutionContext, ExecutionSandbox, FileOperationGateway, ListOptions,
    OperationOptions, PathIssue, PathValidator, ReadOptions, SandboxEvent, SandboxRuntime,
    StaticConsentGate, TerminalHandler, WriteOptions,
};
