//! Sandbox configuration
//!
//! All knobs are overridable at construction. Configuration files are JSON
//! with camelCase keys; any key left out falls back to its default.

use crate::error::{Error, Result};
use crate::types::{ResourceLimits, TerminalPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxConfig {
    pub enable_user_prompts: bool,
    pub max_path_length: usize,
    pub max_file_size: u64,
    /// Default timeout for sandboxed tool executions
    pub default_timeout_ms: u64,
    /// Default timeout for gateway file operations
    pub operation_timeout_ms: u64,
    pub max_concurrent_executions: usize,
    pub max_history_size: usize,
    pub max_list_entries: usize,
    /// Literal paths, matched exactly or as a directory prefix
    pub blocked_paths: Vec<String>,
    /// Regular expressions tested against raw and normalized paths
    pub blocked_path_patterns: Vec<String>,
    /// Regular expressions tested against the full path and the file name
    pub sensitive_file_patterns: Vec<String>,
    pub app_name: String,
    pub app_data_dir: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub environment: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
    pub terminal_policy: TerminalPolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enable_user_prompts: true,
            max_path_length: 4096,
            max_file_size: 10 * 1024 * 1024,
            default_timeout_ms: 30_000,
            operation_timeout_ms: 30_000,
            max_concurrent_executions: 5,
            max_history_size: 100,
            max_list_entries: 1000,
            blocked_paths: default_blocked_paths(),
            blocked_path_patterns: default_blocked_path_patterns(),
            sensitive_file_patterns: default_sensitive_file_patterns(),
            app_name: "toolgate".to_string(),
            app_data_dir: None,
            working_directory: None,
            environment: HashMap::new(),
            resource_limits: ResourceLimits::default(),
            terminal_policy: TerminalPolicy::default(),
        }
    }
}

impl SandboxConfig {
    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading sandbox configuration from {:?}", path);
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject limits that would make the sandbox unusable
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(Error::Config(
                "maxConcurrentExecutions must be at least 1".to_string(),
            ));
        }
        if self.max_path_length == 0 {
            return Err(Error::Config("maxPathLength must be at least 1".to_string()));
        }
        if self.default_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        for pattern in self
            .blocked_path_patterns
            .iter()
            .chain(self.sensitive_file_patterns.iter())
        {
            regex::Regex::new(pattern)
                .map_err(|e| Error::Config(format!("invalid pattern {:?}: {}", pattern, e)))?;
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Application data directory, `<data dir>/<app name>` unless overridden
    pub fn resolved_app_data_dir(&self) -> Option<PathBuf> {
        self.app_data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(&self.app_name)))
    }

    /// Working directory handed to executors
    pub fn resolved_working_directory(&self) -> PathBuf {
        self.working_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(windows)]
fn default_blocked_paths() -> Vec<String> {
    vec![
        "C:\\Windows".to_string(),
        "C:\\Program Files".to_string(),
        "C:\\Program Files (x86)".to_string(),
        "C:\\ProgramData".to_string(),
    ]
}

#[cfg(not(windows))]
fn default_blocked_paths() -> Vec<String> {
    [
        "/etc",
        "/bin",
        "/sbin",
        "/usr/bin",
        "/usr/sbin",
        "/boot",
        "/dev",
        "/proc",
        "/sys",
        "/private/etc",
        "/System",
        "/Library/Keychains",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(windows)]
fn default_blocked_path_patterns() -> Vec<String> {
    vec![
        r"(?i)^[a-z]:\\windows(\\|$)".to_string(),
        r"(?i)^[a-z]:\\program files( \(x86\))?(\\|$)".to_string(),
    ]
}

#[cfg(not(windows))]
fn default_blocked_path_patterns() -> Vec<String> {
    vec![r"^/(proc|sys)(/|$)".to_string()]
}

fn default_sensitive_file_patterns() -> Vec<String> {
    [
        r"(?i)(^|[/\\])\.env(\.[^/\\]*)?$",
        r"(?i)(^|[/\\])\.ssh([/\\]|$)",
        r"(?i)(^|[/\\])id_(rsa|dsa|ecdsa|ed25519)(\.pub)?$",
        r"(?i)\.(pem|key|p12|pfx)$",
        r"(?i)(^|[/\\])\.aws([/\\]|$)",
        r"(?i)(^|[/\\])\.gnupg([/\\]|$)",
        r"(?i)(^|[/\\])\.kube[/\\]config$",
        r"(?i)(^|[/\\])\.(netrc|npmrc|pypirc)$",
        r"(?i)(^|[/\\])credentials(\.json)?$",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
