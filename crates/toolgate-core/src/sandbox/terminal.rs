//! Terminal command execution with policy checks

use super::execution::ExecutionContext;
use crate::error::{Error, ExecutionError, Result, SandboxError};
use crate::types::{TerminalExecuteResult, TerminalPolicy};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands allowed by a [`TerminalPolicy`] inside an execution context
#[derive(Debug, Clone, Default)]
pub struct TerminalHandler {
    policy: TerminalPolicy,
}

impl TerminalHandler {
    pub fn new(policy: TerminalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TerminalPolicy {
        &self.policy
    }

    /// Check a command line against the policy, returning it joined
    pub fn check_command(&self, command: &str, args: &[String]) -> Result<String> {
        if !self.policy.enabled {
            return Err(Error::Sandbox(SandboxError::TerminalDenied(
                "Terminal execution is disabled by policy".to_string(),
            )));
        }

        let cmd_name = Path::new(command)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(command);

        if !self.policy.allowed_commands.is_empty()
            && !self.policy.allowed_commands.iter().any(|c| c == cmd_name)
        {
            return Err(Error::Sandbox(SandboxError::TerminalDenied(format!(
                "Command '{}' is not allowed by policy",
                cmd_name
            ))));
        }

        let full_cmd = if args.is_empty() {
            cmd_name.to_string()
        } else {
            format!("{} {}", cmd_name, args.join(" "))
        };

        if let Some(pattern) = self
            .policy
            .blocked_patterns
            .iter()
            .find(|pat| full_cmd.contains(pat.as_str()))
        {
            return Err(Error::Sandbox(SandboxError::TerminalDenied(format!(
                "Command matched blocked pattern '{}': {}",
                pattern, full_cmd
            ))));
        }

        Ok(full_cmd)
    }

    /// Run `command` in the context's working directory and environment.
    ///
    /// The child is killed if the context is cancelled or this future is
    /// dropped. Output beyond `max_output_bytes` is cut off and flagged.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        ctx: &ExecutionContext,
    ) -> Result<TerminalExecuteResult> {
        let full_cmd = self.check_command(command, args)?;
        debug!(
            "Executing command: {} (cwd: {:?})",
            full_cmd, ctx.working_directory
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&ctx.working_directory)
            .envs(&ctx.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = ctx.cancellation.cancelled() => {
                warn!("Killing '{}' for cancelled execution {}", full_cmd, ctx.execution_id);
                return Err(Error::Execution(ExecutionError::Cancelled {
                    execution_id: ctx.execution_id.clone(),
                    tool_name: ctx.tool_name.clone(),
                }));
            }
        };

        let limit = ctx.resource_limits.max_output_bytes;
        let (stdout, stdout_cut) = truncate_output(&output.stdout, limit);
        let (stderr, stderr_cut) = truncate_output(&output.stderr, limit);

        Ok(TerminalExecuteResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
        })
    }
}

fn truncate_output(bytes: &[u8], limit: Option<usize>) -> (String, bool) {
    match limit {
        Some(max) if bytes.len() > max => (String::from_utf8_lossy(&bytes[..max]).to_string(), true),
        _ => (String::from_utf8_lossy(bytes).to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::SandboxConfig;
    use crate::sandbox::execution::{ExecuteOptions, ExecutionSandbox};
    use crate::types::{ExecutionStatus, ResourceLimits};
    use std::sync::Arc;
    use std::time::Duration;

    fn policy_with(allowed: &[&str]) -> TerminalPolicy {
        TerminalPolicy {
            allowed_commands: allowed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn sandbox_in(dir: &Path) -> ExecutionSandbox {
        let config = SandboxConfig {
            working_directory: Some(dir.to_path_buf()),
            ..Default::default()
        };
        ExecutionSandbox::new(&config, Arc::new(MemoryAuditSink::new()))
    }

    #[test]
    fn test_disabled_policy() {
        let handler = TerminalHandler::new(TerminalPolicy {
            enabled: false,
            ..Default::default()
        });
        let err = handler.check_command("ls", &[]).unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_command_not_in_allow_list() {
        let handler = TerminalHandler::default();
        let err = handler.check_command("/usr/bin/curl", &["example.com".to_string()]).unwrap_err();
        assert!(err.to_string().contains("'curl' is not allowed"));
    }

    #[test]
    fn test_blocked_pattern() {
        let handler = TerminalHandler::new(policy_with(&["rm"]));
        assert!(handler
            .check_command("rm", &["-rf".to_string(), "build".to_string()])
            .is_err());
        assert_eq!(
            handler.check_command("rm", &["build.log".to_string()]).unwrap(),
            "rm build.log"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_runs_in_context() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        let handler = TerminalHandler::default();

        let result = sandbox
            .execute(
                "terminal",
                |ctx| async move { handler.execute("echo", &["hello".to_string()], &ctx).await },
                ExecuteOptions::default(),
            )
            .await
            .unwrap();

        let output = result.result.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_truncated_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        let handler = TerminalHandler::default();

        let result = sandbox
            .execute(
                "terminal",
                |ctx| async move { handler.execute("echo", &["hello world".to_string()], &ctx).await },
                ExecuteOptions {
                    resource_limits: Some(ResourceLimits {
                        max_output_bytes: Some(5),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let output = result.result.unwrap();
        assert_eq!(output.stdout, "hello");
        assert!(output.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_long_command_killed_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(dir.path());
        let handler = TerminalHandler::new(policy_with(&["sleep"]));

        let started = std::time::Instant::now();
        let result = sandbox
            .execute(
                "terminal",
                |ctx| async move { handler.execute("sleep", &["5".to_string()], &ctx).await },
                ExecuteOptions {
                    timeout: Some(Duration::from_millis(100)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
