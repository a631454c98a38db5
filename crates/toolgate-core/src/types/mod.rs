//! Core type definitions for Toolgate
//!
//! This module contains the shared types used across the sandbox,
//! including access-control types, execution types and listing metadata.

mod access_types;
mod execution_types;

pub use access_types::*;
pub use execution_types::*;

use serde::{Deserialize, Serialize};

/// File metadata for directory listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
    pub mime_type: Option<String>,
}

impl FileMetadata {
    /// Build metadata for a path from its `std::fs::Metadata`
    pub fn from_fs(path: &std::path::Path, metadata: &std::fs::Metadata) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            is_dir: metadata.is_dir(),
            size: if metadata.is_file() {
                Some(metadata.len())
            } else {
                None
            },
            modified: metadata.modified().ok().map(|t| t.into()),
            mime_type: if metadata.is_file() {
                Some(
                    mime_guess::from_path(path)
                        .first_or_octet_stream()
                        .to_string(),
                )
            } else {
                None
            },
        }
    }
}

/// Result of a file write operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWriteResult {
    pub path: String,
    pub created: bool,
    pub size: u64,
    pub hash_before: Option<String>,
    pub hash_after: String,
}

/// Terminal execution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminalPolicy {
    pub enabled: bool,
    pub allowed_commands: Vec<String>,
    pub blocked_patterns: Vec<String>,
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_commands: vec![
                "ls".to_string(),
                "cat".to_string(),
                "echo".to_string(),
                "grep".to_string(),
                "find".to_string(),
                "pwd".to_string(),
                "mkdir".to_string(),
                "touch".to_string(),
            ],
            blocked_patterns: vec![
                "rm -rf".to_string(),
                "sudo".to_string(),
                "chmod".to_string(),
                "chown".to_string(),
            ],
        }
    }
}

/// Output of a terminal command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExecuteResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}
