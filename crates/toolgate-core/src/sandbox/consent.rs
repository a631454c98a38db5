//! Human consent for access outside existing grants
//!
//! The platform adapter (dialog, terminal prompt, headless auto-deny) sits
//! behind [`ConsentGate`]. [`ConsentCoordinator`] coalesces concurrent
//! requests for the same directory and operation into one prompt and writes
//! the resulting grant into the [`AccessRegistry`].

use super::permissions::{AccessRegistry, GrantOptions};
use crate::types::FileOperation;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Answer to a consent request, including how long an approval lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    Denied,
    /// Approved for five minutes
    AllowOnce,
    /// Approved permanently
    AllowRemember,
    /// Approved for 24 hours
    Allow,
}

impl ConsentDecision {
    pub fn is_granted(&self) -> bool {
        !matches!(self, ConsentDecision::Denied)
    }

    /// Expiry of the grant this decision produces; `None` means permanent
    pub fn expires_at(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            ConsentDecision::AllowOnce => Some(now + chrono::Duration::minutes(5)),
            ConsentDecision::Allow => Some(now + chrono::Duration::hours(24)),
            ConsentDecision::AllowRemember | ConsentDecision::Denied => None,
        }
    }
}

/// What the user is asked to approve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub directory: PathBuf,
    pub operation: FileOperation,
    pub reason: Option<String>,
    pub source: Option<String>,
}

/// Asks a human to approve access to a directory
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentGate: Send + Sync {
    async fn request_access(&self, request: ConsentRequest) -> ConsentDecision;
}

/// Gate for headless runs: every request is denied
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDenyGate;

#[async_trait]
impl ConsentGate for AutoDenyGate {
    async fn request_access(&self, request: ConsentRequest) -> ConsentDecision {
        debug!(
            "Auto-denying {} access to {:?}",
            request.operation, request.directory
        );
        ConsentDecision::Denied
    }
}

/// Gate that always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct StaticConsentGate(pub ConsentDecision);

#[async_trait]
impl ConsentGate for StaticConsentGate {
    async fn request_access(&self, _request: ConsentRequest) -> ConsentDecision {
        self.0
    }
}

type PendingConsent = Shared<BoxFuture<'static, ConsentDecision>>;
type ConsentKey = (PathBuf, FileOperation);

/// Deduplicates consent prompts and records approvals as grants
pub struct ConsentCoordinator {
    gate: Arc<dyn ConsentGate>,
    registry: Arc<AccessRegistry>,
    pending: Arc<Mutex<HashMap<ConsentKey, PendingConsent>>>,
}

impl ConsentCoordinator {
    pub fn new(gate: Arc<dyn ConsentGate>, registry: Arc<AccessRegistry>) -> Self {
        Self {
            gate,
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask for consent, joining an identical request already in flight.
    ///
    /// The grant is written by the shared future itself, so it happens once
    /// no matter which caller drives it to completion.
    pub async fn request(&self, request: ConsentRequest) -> ConsentDecision {
        let key = (request.directory.clone(), request.operation);

        let pending = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(existing) => {
                    debug!(
                        "Joining pending consent request for {} on {:?}",
                        key.1, key.0
                    );
                    existing.clone()
                }
                None => {
                    let future = self.prompt(key.clone(), request);
                    pending.insert(key, future.clone());
                    future
                }
            }
        };

        pending.await
    }

    fn prompt(&self, key: ConsentKey, request: ConsentRequest) -> PendingConsent {
        let gate = Arc::clone(&self.gate);
        let registry = Arc::clone(&self.registry);
        let pending = Arc::clone(&self.pending);

        async move {
            let (directory, operation) = key.clone();
            info!("Requesting consent for {} on {:?}", operation, directory);

            let decision = gate.request_access(request).await;
            if decision.is_granted() {
                let expires_at = decision.expires_at(chrono::Utc::now());
                registry.add_to_whitelist(
                    &directory,
                    operation.consent_grant(),
                    GrantOptions::user_until(expires_at),
                );
            } else {
                info!("Consent denied for {} on {:?}", operation, directory);
            }

            pending.lock().remove(&key);
            decision
        }
        .boxed()
        .shared()
    }

    /// Number of prompts currently awaiting an answer
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
