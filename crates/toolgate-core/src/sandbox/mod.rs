//! Tool-execution sandbox
//!
//! This module provides:
//! - Path validation and normalization
//! - The directory allow-list with expiring grants
//! - Consent prompts for access outside existing grants
//! - Gated file system operations
//! - Sandboxed tool execution and a policy-checked terminal executor

pub mod consent;
pub mod execution;
pub mod filesystem;
pub mod permissions;
mod sanitize;
mod terminal;
pub mod validator;

pub use consent::{
    AutoDenyGate, ConsentCoordinator, ConsentDecision, ConsentGate, ConsentRequest,
    StaticConsentGate,
};
pub use execution::{ExecuteOptions, ExecutionContext, ExecutionSandbox, SandboxEvent};
pub use filesystem::{
    AccessOptions, FileOperationGateway, ListOptions, OperationOptions, ReadOptions, WriteOptions,
};
pub use permissions::{AccessRegistry, GrantOptions};
pub use sanitize::{is_sensitive_key, sanitize_params, REDACTED};
pub use terminal::TerminalHandler;
pub use validator::{normalize_path, resolve_path, PathIssue, PathValidationResult, PathValidator};

use crate::audit::AuditSink;
use crate::config::SandboxConfig;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Owns one instance of every sandbox component, wired together
pub struct SandboxRuntime {
    config: SandboxConfig,
    validator: Arc<PathValidator>,
    registry: Arc<AccessRegistry>,
    gateway: Arc<FileOperationGateway>,
    sandbox: Arc<ExecutionSandbox>,
    terminal: TerminalHandler,
    audit: Arc<dyn AuditSink>,
}

impl SandboxRuntime {
    /// Build the runtime. Without a consent gate, access outside the
    /// default grants is denied.
    pub fn new(
        config: SandboxConfig,
        consent: Option<Arc<dyn ConsentGate>>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;

        let validator = Arc::new(PathValidator::new(&config)?);
        let registry = Arc::new(AccessRegistry::with_defaults(&config));

        let mut gateway = FileOperationGateway::new(
            &config,
            Arc::clone(&validator),
            Arc::clone(&registry),
            Arc::clone(&audit),
        );
        if let Some(gate) = consent {
            gateway = gateway.with_consent_gate(gate);
        }

        let sandbox = Arc::new(ExecutionSandbox::new(&config, Arc::clone(&audit)));
        let terminal = TerminalHandler::new(config.terminal_policy.clone());

        info!(
            "Sandbox runtime ready (session {}, {} default grants)",
            sandbox.session_id(),
            registry.len()
        );

        Ok(Self {
            config,
            validator,
            registry,
            gateway: Arc::new(gateway),
            sandbox,
            terminal,
            audit,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn validator(&self) -> Arc<PathValidator> {
        Arc::clone(&self.validator)
    }

    pub fn registry(&self) -> Arc<AccessRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn gateway(&self) -> Arc<FileOperationGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn sandbox(&self) -> Arc<ExecutionSandbox> {
        Arc::clone(&self.sandbox)
    }

    pub fn terminal(&self) -> &TerminalHandler {
        &self.terminal
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit)
    }
}
