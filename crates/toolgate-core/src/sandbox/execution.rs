//! Sandboxed tool execution with concurrency, timeout and audit control
//!
//! Every call to [`ExecutionSandbox::execute`] moves through
//! pending → running → completed | failed | cancelled. The active entry is
//! removed exactly once on every path, including when the caller drops the
//! future, and a finalized [`ExecutionRecord`] always lands in the bounded
//! history.

use super::sanitize::sanitize_params;
use crate::audit::{AuditCategory, AuditLevel, AuditSink};
use crate::config::SandboxConfig;
use crate::error::{Error, ExecutionError, Result};
use crate::types::*;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-call options for [`ExecutionSandbox::execute`]
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub params: ToolParams,
    pub timeout: Option<Duration>,
    pub resource_limits: Option<ResourceLimits>,
    pub source: Option<String>,
}

/// Everything an executor is handed when it starts
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub tool_name: String,
    pub session_id: String,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
    /// Original, unsanitized parameters
    pub params: ToolParams,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Fires when the execution is cancelled or times out
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Lifecycle notifications for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxEvent {
    Started {
        execution_id: String,
        tool_name: String,
    },
    Completed {
        execution_id: String,
        tool_name: String,
        duration_ms: u64,
    },
    Failed {
        execution_id: String,
        tool_name: String,
        error: String,
        duration_ms: u64,
    },
    Cancelled {
        execution_id: String,
        tool_name: String,
    },
}

struct ActiveExecution {
    tool_name: String,
    started_at: chrono::DateTime<chrono::Utc>,
    status: ExecutionStatus,
    cancellation: CancellationToken,
}

impl ActiveExecution {
    fn cleanup(&self) {
        self.cancellation.cancel();
    }
}

/// Runs tool callables under the sandbox's limits
pub struct ExecutionSandbox {
    session_id: String,
    max_concurrent_executions: usize,
    max_history_size: usize,
    default_timeout: Duration,
    working_directory: PathBuf,
    environment: HashMap<String, String>,
    resource_limits: ResourceLimits,
    audit: Arc<dyn AuditSink>,
    active: Mutex<HashMap<String, ActiveExecution>>,
    history: Mutex<VecDeque<ExecutionRecord>>,
    counter: AtomicU64,
    events: broadcast::Sender<SandboxEvent>,
}

impl ExecutionSandbox {
    pub fn new(config: &SandboxConfig, audit: Arc<dyn AuditSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            max_concurrent_executions: config.max_concurrent_executions,
            max_history_size: config.max_history_size,
            default_timeout: config.default_timeout(),
            working_directory: config.resolved_working_directory(),
            environment: config.environment.clone(),
            resource_limits: config.resource_limits.clone(),
            audit,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
            events,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    /// Run `executor` under the concurrency limit, a timeout and the audit trail.
    ///
    /// Fails immediately with a concurrency-limit error when the sandbox is
    /// full. Every other outcome, including timeouts, cancellation and
    /// executor panics, is reported in the returned [`ExecutionResult`].
    pub async fn execute<T, F, Fut>(
        &self,
        tool_name: &str,
        executor: F,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult<T>>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();
        let cancellation = CancellationToken::new();

        let execution_id = {
            let mut active = self.active.lock();
            if active.len() >= self.max_concurrent_executions {
                warn!(
                    "Rejecting {}: {} executions already in flight",
                    tool_name,
                    active.len()
                );
                return Err(Error::Execution(ExecutionError::ConcurrencyLimit {
                    tool_name: tool_name.to_string(),
                    limit: self.max_concurrent_executions,
                }));
            }

            let id = self.next_execution_id(started_at);
            active.insert(
                id.clone(),
                ActiveExecution {
                    tool_name: tool_name.to_string(),
                    started_at,
                    status: ExecutionStatus::Pending,
                    cancellation: cancellation.clone(),
                },
            );
            id
        };

        let source = options.source.unwrap_or_else(|| "agent".to_string());
        let sanitized = sanitize_params(&options.params);
        let mut guard = ActiveGuard {
            sandbox: self,
            execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            params: sanitized.clone(),
            source: source.clone(),
            started_at,
            clock,
            armed: true,
        };

        let resource_limits = match &options.resource_limits {
            Some(overrides) => self.resource_limits.merged_with(overrides),
            None => self.resource_limits.clone(),
        };
        let context = ExecutionContext {
            execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            session_id: self.session_id.clone(),
            working_directory: self.working_directory.clone(),
            environment: self.environment.clone(),
            resource_limits,
            params: options.params,
            started_at,
            cancellation: cancellation.clone(),
        };

        info!("Starting execution {} ({})", execution_id, tool_name);
        self.audit.log(
            AuditCategory::Execution,
            AuditLevel::Info,
            &format!("Execution started: {}", tool_name),
            json!({
                "executionId": execution_id,
                "toolName": tool_name,
                "params": sanitized,
                "source": source,
                "sessionId": self.session_id,
            }),
        );
        self.emit(SandboxEvent::Started {
            execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
        });

        self.mark_running(&execution_id);
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let outcome: Result<T> = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Error::Execution(ExecutionError::Cancelled {
                execution_id: execution_id.clone(),
                tool_name: tool_name.to_string(),
            })),
            finished = AssertUnwindSafe(async move { executor(context).await }).catch_unwind() => match finished {
                Ok(result) => result,
                Err(payload) => Err(Error::Execution(ExecutionError::Panicked {
                    execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                    message: panic_message(payload.as_ref()),
                })),
            },
            _ = tokio::time::sleep(timeout) => Err(Error::Execution(ExecutionError::Timeout {
                execution_id: execution_id.clone(),
                tool_name: tool_name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })),
        };

        // Whoever removes the active entry owns its terminal notification
        let still_active = guard.finish();
        let ended_at = chrono::Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;

        let (status, result, error) = match (outcome, still_active) {
            (Ok(value), true) => (ExecutionStatus::Completed, Some(value), None),
            (Err(err), true) if is_cancellation(&err) => {
                self.report_cancelled(&execution_id, tool_name);
                (ExecutionStatus::Cancelled, None, Some(ExecutionFailure::from(&err)))
            }
            (Err(err), true) => (ExecutionStatus::Failed, None, Some(ExecutionFailure::from(&err))),
            (_, false) => {
                let err = Error::Execution(ExecutionError::Cancelled {
                    execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                });
                (ExecutionStatus::Cancelled, None, Some(ExecutionFailure::from(&err)))
            }
        };

        match status {
            ExecutionStatus::Completed => {
                info!("Execution {} completed in {}ms", execution_id, duration_ms);
                self.audit.log(
                    AuditCategory::Execution,
                    AuditLevel::Info,
                    &format!("Execution completed: {}", tool_name),
                    json!({
                        "executionId": execution_id,
                        "toolName": tool_name,
                        "durationMs": duration_ms,
                    }),
                );
                self.emit(SandboxEvent::Completed {
                    execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                    duration_ms,
                });
            }
            ExecutionStatus::Failed => {
                let message = error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                warn!("Execution {} failed: {}", execution_id, message);
                self.audit.log(
                    AuditCategory::Execution,
                    AuditLevel::Error,
                    &format!("Execution failed: {}", tool_name),
                    json!({
                        "executionId": execution_id,
                        "toolName": tool_name,
                        "durationMs": duration_ms,
                        "error": message,
                    }),
                );
                self.emit(SandboxEvent::Failed {
                    execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                    error: message,
                    duration_ms,
                });
            }
            _ => debug!("Execution {} ended as {:?}", execution_id, status),
        }

        self.push_history(ExecutionRecord {
            id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            params: sanitized,
            start_time: started_at,
            end_time: ended_at,
            duration_ms,
            success: status == ExecutionStatus::Completed,
            status,
            error: error.as_ref().map(|e| e.message.clone()),
            source,
            session_id: self.session_id.clone(),
        });

        Ok(ExecutionResult {
            execution_id,
            tool_name: tool_name.to_string(),
            success: status == ExecutionStatus::Completed,
            status,
            result,
            error,
            started_at,
            ended_at,
            duration_ms,
        })
    }

    /// Cancel an in-flight execution. Returns false if it is not active.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        let Some(entry) = self.active.lock().remove(execution_id) else {
            return false;
        };
        entry.cleanup();
        info!("Cancelled execution {} ({})", execution_id, entry.tool_name);
        self.report_cancelled(execution_id, &entry.tool_name);
        true
    }

    /// Cancel every in-flight execution, returning how many were cancelled
    pub fn cancel_all_executions(&self) -> usize {
        let drained: Vec<(String, ActiveExecution)> = self.active.lock().drain().collect();
        for (id, entry) in &drained {
            entry.cleanup();
            self.report_cancelled(id, &entry.tool_name);
        }
        if !drained.is_empty() {
            info!("Cancelled {} executions", drained.len());
        }
        drained.len()
    }

    /// Statistics computed from the history buffer
    pub fn get_stats(&self) -> ExecutionStats {
        let history = self.history.lock();
        let mut stats = ExecutionStats {
            total: history.len(),
            active: self.active_count(),
            ..Default::default()
        };

        let mut total_duration: u64 = 0;
        for record in history.iter() {
            match record.status {
                ExecutionStatus::Completed => stats.successful += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            }
            total_duration += record.duration_ms;
            *stats.by_tool.entry(record.tool_name.clone()).or_insert(0) += 1;
        }

        if stats.total > 0 {
            stats.average_duration_ms = total_duration as f64 / stats.total as f64;
        }
        stats
    }

    /// Most recent records, oldest first
    pub fn history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let history = self.history.lock();
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    pub fn active_executions(&self) -> Vec<ActiveExecutionInfo> {
        let mut active: Vec<_> = self
            .active
            .lock()
            .iter()
            .map(|(id, entry)| ActiveExecutionInfo {
                id: id.clone(),
                tool_name: entry.tool_name.clone(),
                status: entry.status,
                start_time: entry.started_at,
            })
            .collect();
        active.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        active
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Time prefix, process-wide counter and random suffix
    fn next_execution_id(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "exec_{:x}_{}_{}",
            now.timestamp_millis(),
            sequence,
            &suffix[..8]
        )
    }

    fn mark_running(&self, execution_id: &str) {
        if let Some(entry) = self.active.lock().get_mut(execution_id) {
            entry.status = ExecutionStatus::Running;
        }
    }

    fn report_cancelled(&self, execution_id: &str, tool_name: &str) {
        self.audit.log(
            AuditCategory::Execution,
            AuditLevel::Warn,
            &format!("Execution cancelled: {}", tool_name),
            json!({
                "executionId": execution_id,
                "toolName": tool_name,
            }),
        );
        self.emit(SandboxEvent::Cancelled {
            execution_id: execution_id.to_string(),
            tool_name: tool_name.to_string(),
        });
    }

    fn push_history(&self, record: ExecutionRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.max_history_size {
            history.pop_front();
        }
    }

    fn emit(&self, event: SandboxEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Removes the active entry exactly once. If the execution future is dropped
/// before finishing, the drop records it as cancelled.
struct ActiveGuard<'a> {
    sandbox: &'a ExecutionSandbox,
    execution_id: String,
    tool_name: String,
    params: serde_json::Value,
    source: String,
    started_at: chrono::DateTime<chrono::Utc>,
    clock: Instant,
    armed: bool,
}

impl ActiveGuard<'_> {
    /// Disarm and remove the entry; false if someone else already removed it
    fn finish(&mut self) -> bool {
        self.armed = false;
        match self.sandbox.active.lock().remove(&self.execution_id) {
            Some(entry) => {
                entry.cleanup();
                true
            }
            None => false,
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.finish() {
            return;
        }

        warn!(
            "Execution {} dropped before completion",
            self.execution_id
        );
        self.sandbox
            .report_cancelled(&self.execution_id, &self.tool_name);
        self.sandbox.push_history(ExecutionRecord {
            id: self.execution_id.clone(),
            tool_name: self.tool_name.clone(),
            params: self.params.clone(),
            start_time: self.started_at,
            end_time: chrono::Utc::now(),
            duration_ms: self.clock.elapsed().as_millis() as u64,
            success: false,
            status: ExecutionStatus::Cancelled,
            error: Some("execution dropped before completion".to_string()),
            source: self.source.clone(),
            session_id: self.sandbox.session_id.clone(),
        });
    }
}

fn is_cancellation(err: &Error) -> bool {
    matches!(err, Error::Execution(ExecutionError::Cancelled { .. }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemoryAuditSink, MockAuditSink};
    use crate::error::{ErrorCode, SandboxError};
    use pretty_assertions::assert_eq;

    fn sandbox_with(config: SandboxConfig) -> (Arc<ExecutionSandbox>, MemoryAuditSink) {
        let audit = MemoryAuditSink::new();
        let sandbox = Arc::new(ExecutionSandbox::new(&config, Arc::new(audit.clone())));
        (sandbox, audit)
    }

    fn sandbox() -> (Arc<ExecutionSandbox>, MemoryAuditSink) {
        sandbox_with(SandboxConfig::default())
    }

    fn timeout_options(ms: u64) -> ExecuteOptions {
        ExecuteOptions {
            timeout: Some(Duration::from_millis(ms)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let (sandbox, audit) = sandbox();

        let result = sandbox
            .execute("echo", |ctx| async move { Ok(ctx.tool_name.len()) }, ExecuteOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.result, Some(4));
        assert_eq!(sandbox.active_count(), 0);
        assert_eq!(
            audit.messages(),
            vec!["Execution started: echo", "Execution completed: echo"]
        );

        let history = sandbox.history(None);
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].session_id, sandbox.session_id());
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_result() {
        let (sandbox, audit) = sandbox();

        let result = sandbox
            .execute(
                "terminal",
                |_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                timeout_options(50),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::Timeout);
        assert!(error.message.contains("timed out"));
        assert!(error.message.contains(&result.execution_id));
        assert_eq!(sandbox.active_count(), 0);
        assert_eq!(
            audit.messages(),
            vec!["Execution started: terminal", "Execution failed: terminal"]
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_context_token() {
        let (sandbox, _) = sandbox();
        let (tx, rx) = tokio::sync::oneshot::channel();

        sandbox
            .execute(
                "watcher",
                |ctx| async move {
                    let _ = tx.send(ctx.cancellation.clone());
                    std::future::pending::<Result<()>>().await
                },
                timeout_options(20),
            )
            .await
            .unwrap();

        let token = rx.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_executor_error_is_failed_result() {
        let (sandbox, _) = sandbox();

        let result: ExecutionResult<()> = sandbox
            .execute(
                "broken",
                |_| async { Err(Error::Internal("boom".into())) },
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().message.contains("boom"));
        assert!(result.into_result().is_err());
    }

    async fn explode(_ctx: ExecutionContext) -> Result<()> {
        panic!("executor exploded")
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained() {
        let (sandbox, _) = sandbox();

        let result: ExecutionResult<()> = sandbox
            .execute("panicky", explode, ExecuteOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().message.contains("executor exploded"));
        assert_eq!(sandbox.active_count(), 0);
    }

    fn explode_early(_ctx: ExecutionContext) -> std::future::Ready<Result<()>> {
        panic!("panicked before the future existed")
    }

    #[tokio::test]
    async fn test_executor_panicking_on_call_is_contained() {
        let (sandbox, audit) = sandbox();

        let result = sandbox
            .execute("panicky", explode_early, ExecuteOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::ExecutionError);
        assert!(error.message.contains("panicked before the future existed"));
        assert_eq!(sandbox.active_count(), 0);

        let history = sandbox.history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(
            audit.messages(),
            vec!["Execution started: panicky", "Execution failed: panicky"]
        );
    }

    #[tokio::test]
    async fn test_timeout_survives_into_result() {
        let (sandbox, _) = sandbox();

        let result = sandbox
            .execute(
                "terminal",
                |_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
                timeout_options(20),
            )
            .await
            .unwrap();
        let execution_id = result.execution_id.clone();

        let err = result.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(matches!(
            err,
            Error::Execution(ExecutionError::Timeout { timeout_ms: 20, .. })
        ));
        let message = err.to_string();
        assert_eq!(message.matches("timed out").count(), 1, "{}", message);
        assert_eq!(message.matches(&execution_id).count(), 1, "{}", message);
    }

    #[tokio::test]
    async fn test_executor_error_code_survives_into_result() {
        let (sandbox, _) = sandbox();

        let result: ExecutionResult<()> = sandbox
            .execute(
                "reader",
                |_| async {
                    Err(Error::Sandbox(SandboxError::FileNotFound(
                        "/tmp/missing".into(),
                    )))
                },
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        let err = result.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "Sandbox error: File not found: /tmp/missing");
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects_immediately() {
        let (sandbox, _) = sandbox_with(SandboxConfig {
            max_concurrent_executions: 2,
            ..Default::default()
        });

        let slow = |_ctx: ExecutionContext| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<(), Error>(())
        };

        let (a, b, c) = tokio::join!(
            sandbox.execute("slow", slow, ExecuteOptions::default()),
            sandbox.execute("slow", slow, ExecuteOptions::default()),
            sandbox.execute("slow", slow, ExecuteOptions::default()),
        );

        let outcomes = [a, b, c];
        let rejected: Vec<_> = outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].code(), ErrorCode::ConcurrencyLimit);
        assert_eq!(
            outcomes.iter().filter(|r| matches!(r, Ok(res) if res.success)).count(),
            2
        );
        assert_eq!(sandbox.history(None).len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_execution() {
        let (sandbox, audit) = sandbox();
        let mut events = sandbox.subscribe();

        let runner = {
            let sandbox = sandbox.clone();
            tokio::spawn(async move {
                sandbox
                    .execute(
                        "long",
                        |ctx| async move {
                            ctx.cancellation.cancelled().await;
                            Ok(())
                        },
                        ExecuteOptions::default(),
                    )
                    .await
            })
        };

        let execution_id = match events.recv().await.unwrap() {
            SandboxEvent::Started { execution_id, .. } => execution_id,
            other => panic!("unexpected event {:?}", other),
        };

        assert!(sandbox.cancel_execution(&execution_id));
        assert!(!sandbox.cancel_execution(&execution_id));

        let result = runner.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
        assert!(!result.success);
        assert_eq!(sandbox.active_count(), 0);

        let cancelled = audit
            .messages()
            .into_iter()
            .filter(|m| m.starts_with("Execution cancelled"))
            .count();
        assert_eq!(cancelled, 1);
        assert_eq!(sandbox.get_stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_all_executions() {
        let (sandbox, _) = sandbox();
        let mut events = sandbox.subscribe();

        let mut runners = Vec::new();
        for _ in 0..3 {
            let sandbox = sandbox.clone();
            runners.push(tokio::spawn(async move {
                sandbox
                    .execute(
                        "wait",
                        |ctx| async move {
                            ctx.cancellation.cancelled().await;
                            Ok(())
                        },
                        ExecuteOptions::default(),
                    )
                    .await
            }));
        }
        for _ in 0..3 {
            events.recv().await.unwrap();
        }

        assert_eq!(sandbox.active_executions().len(), 3);
        assert_eq!(sandbox.cancel_all_executions(), 3);
        assert_eq!(sandbox.cancel_all_executions(), 0);

        for runner in runners {
            let result = runner.await.unwrap().unwrap();
            assert_eq!(result.status, ExecutionStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_dropped_execution_is_cleaned_up() {
        let (sandbox, _) = sandbox();

        let pending = sandbox.execute(
            "abandoned",
            |_| std::future::pending::<Result<()>>(),
            ExecuteOptions::default(),
        );
        let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;

        assert_eq!(sandbox.active_count(), 0);
        let history = sandbox.history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (sandbox, _) = sandbox_with(SandboxConfig {
            max_history_size: 3,
            ..Default::default()
        });

        for i in 0..5 {
            sandbox
                .execute(&format!("tool-{}", i), |_| async { Ok(()) }, ExecuteOptions::default())
                .await
                .unwrap();
        }

        let history = sandbox.history(None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].tool_name, "tool-2");
        assert_eq!(sandbox.history(Some(1))[0].tool_name, "tool-4");
    }

    #[tokio::test]
    async fn test_stats_from_history() {
        let (sandbox, _) = sandbox();

        for _ in 0..2 {
            sandbox
                .execute("read", |_| async { Ok(()) }, ExecuteOptions::default())
                .await
                .unwrap();
        }
        sandbox
            .execute::<(), _, _>(
                "write",
                |_| async { Err(Error::Internal("nope".into())) },
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        let stats = sandbox.get_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_tool.get("read"), Some(&2));
        assert_eq!(stats.by_tool.get("write"), Some(&1));

        sandbox.clear_history();
        assert_eq!(sandbox.get_stats(), ExecutionStats::default());
    }

    #[tokio::test]
    async fn test_params_sanitized_only_in_audit() {
        let mut audit = MockAuditSink::new();
        audit
            .expect_log()
            .withf(|_, _, message, context| {
                !message.starts_with("Execution started") || context["params"]["apiToken"] == json!("[REDACTED]")
            })
            .times(2)
            .return_const(());
        let sandbox = ExecutionSandbox::new(&SandboxConfig::default(), Arc::new(audit));

        let mut params = ToolParams::new();
        params.insert("apiToken".into(), "s3cr3t".into());

        let result = sandbox
            .execute(
                "http",
                |ctx| async move {
                    Ok(ctx.params.get("apiToken").cloned())
                },
                ExecuteOptions {
                    params,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.result.unwrap(), Some(ParamValue::from("s3cr3t")));
        assert_eq!(sandbox.history(None)[0].params["apiToken"], json!("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_context_carries_limits_and_environment() {
        let mut environment = HashMap::new();
        environment.insert("TOOLGATE_MODE".to_string(), "test".to_string());
        let (sandbox, _) = sandbox_with(SandboxConfig {
            environment,
            resource_limits: ResourceLimits {
                max_memory_bytes: Some(1 << 20),
                ..Default::default()
            },
            ..Default::default()
        });

        let result = sandbox
            .execute(
                "inspect",
                |ctx| async move { Ok(ctx) },
                ExecuteOptions {
                    resource_limits: Some(ResourceLimits {
                        max_output_bytes: Some(10),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ctx = result.result.unwrap();
        assert_eq!(ctx.environment.get("TOOLGATE_MODE").map(String::as_str), Some("test"));
        assert_eq!(ctx.resource_limits.max_memory_bytes, Some(1 << 20));
        assert_eq!(ctx.resource_limits.max_output_bytes, Some(10));
        assert!(ctx.execution_id.starts_with("exec_"));
    }

    #[tokio::test]
    async fn test_execution_ids_unique() {
        let (sandbox, _) = sandbox();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let result = sandbox
                .execute("noop", |_| async { Ok(()) }, ExecuteOptions::default())
                .await
                .unwrap();
            assert!(ids.insert(result.execution_id));
        }
    }
}
