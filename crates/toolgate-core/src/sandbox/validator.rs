//! Path normalization and security validation

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Encoded traversal signatures, matched case-insensitively
const ENCODED_TRAVERSAL_PATTERNS: &[&str] = &[
    "%2e%2e",
    "%252e%252e",
    "..%2f",
    "..%5c",
    "%c0%ae",
    "%e0%80%ae",
    "%c0%af",
    "%c1%9c",
];

/// Characters that never appear in a legitimate path we hand out
const UNUSUAL_CHARACTERS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// A single problem found in a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathIssue {
    TraversalSequence,
    NullByte,
    EncodedTraversal { pattern: String },
    BlockedSystemPath { pattern: String },
    SensitiveFile { pattern: String },
    PathTooLong { length: usize, max: usize },
    UnusualCharacters,
}

impl PathIssue {
    /// Blocking issues mark a path that no grant can ever allow
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            PathIssue::TraversalSequence
                | PathIssue::NullByte
                | PathIssue::EncodedTraversal { .. }
                | PathIssue::BlockedSystemPath { .. }
        )
    }
}

impl fmt::Display for PathIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathIssue::TraversalSequence => write!(f, "Path contains traversal sequence (..)"),
            PathIssue::NullByte => write!(f, "Path contains null byte"),
            PathIssue::EncodedTraversal { pattern } => {
                write!(f, "Path contains encoded traversal sequence: {}", pattern)
            }
            PathIssue::BlockedSystemPath { pattern } => {
                write!(f, "Access to blocked system path: {}", pattern)
            }
            PathIssue::SensitiveFile { pattern } => {
                write!(f, "Path matches sensitive file pattern: {}", pattern)
            }
            PathIssue::PathTooLong { length, max } => {
                write!(f, "Path length {} exceeds maximum of {}", length, max)
            }
            PathIssue::UnusualCharacters => {
                write!(f, "Path contains unusual or control characters")
            }
        }
    }
}

/// Result of validating a single path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathValidationResult {
    /// Absolute, cleaned and symlink-resolved path with its case preserved
    pub resolved_path: PathBuf,
    /// Comparison key: `resolved_path` case-folded where the platform ignores case
    pub normalized_path: PathBuf,
    pub issues: Vec<PathIssue>,
    pub valid: bool,
    pub is_blocked: bool,
}

impl PathValidationResult {
    fn new(resolved_path: PathBuf, issues: Vec<PathIssue>) -> Self {
        let valid = issues.is_empty();
        let is_blocked = issues.iter().any(PathIssue::is_blocking);
        Self {
            normalized_path: fold_case(resolved_path.clone()),
            resolved_path,
            issues,
            valid,
            is_blocked,
        }
    }

    /// All issue messages joined for display
    pub fn issue_summary(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validates paths against traversal, blocked locations and sensitive files
#[derive(Debug)]
pub struct PathValidator {
    /// (configured text, normalized path)
    blocked_paths: Vec<(String, PathBuf)>,
    blocked_patterns: Vec<Regex>,
    sensitive_patterns: Vec<Regex>,
    max_path_length: usize,
}

impl PathValidator {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let blocked_paths = config
            .blocked_paths
            .iter()
            .map(|p| (p.clone(), normalize_path(Path::new(p))))
            .collect();

        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(Error::from))
                .collect()
        };

        Ok(Self {
            blocked_paths,
            blocked_patterns: compile(&config.blocked_path_patterns)?,
            sensitive_patterns: compile(&config.sensitive_file_patterns)?,
            max_path_length: config.max_path_length,
        })
    }

    /// Normalize a path the same way validation does
    pub fn normalize(&self, path: impl AsRef<Path>) -> PathBuf {
        normalize_path(path.as_ref())
    }

    /// Resolve a path without case folding, suitable for touching the filesystem
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_path(path.as_ref())
    }

    /// Run every check against `path`; no check short-circuits the others
    pub fn validate(&self, path: impl AsRef<Path>) -> PathValidationResult {
        let path = path.as_ref();
        let raw = path.to_string_lossy();
        let resolved = resolve_path(path);
        let normalized = fold_case(resolved.clone());
        let normalized_str = normalized.to_string_lossy();
        let mut issues = Vec::new();

        if raw.contains("..") {
            issues.push(PathIssue::TraversalSequence);
        }

        if raw.contains('\0') {
            issues.push(PathIssue::NullByte);
        }

        let lowered = raw.to_lowercase();
        for pattern in ENCODED_TRAVERSAL_PATTERNS {
            if lowered.contains(pattern) {
                issues.push(PathIssue::EncodedTraversal {
                    pattern: (*pattern).to_string(),
                });
            }
        }

        for (label, blocked) in &self.blocked_paths {
            if normalized == *blocked || normalized.starts_with(blocked) {
                issues.push(PathIssue::BlockedSystemPath {
                    pattern: label.clone(),
                });
            }
        }
        for pattern in &self.blocked_patterns {
            if pattern.is_match(&raw) || pattern.is_match(&normalized_str) {
                issues.push(PathIssue::BlockedSystemPath {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        let file_name = normalized
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for pattern in &self.sensitive_patterns {
            if pattern.is_match(&raw)
                || pattern.is_match(&normalized_str)
                || (!file_name.is_empty() && pattern.is_match(&file_name))
            {
                issues.push(PathIssue::SensitiveFile {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        let length = raw.chars().count();
        if length > self.max_path_length {
            issues.push(PathIssue::PathTooLong {
                length,
                max: self.max_path_length,
            });
        }

        if has_unusual_characters(&raw) {
            issues.push(PathIssue::UnusualCharacters);
        }

        if !issues.is_empty() {
            debug!("Path {:?} failed validation: {:?}", raw, issues);
        }

        PathValidationResult::new(resolved, issues)
    }
}

fn has_unusual_characters(raw: &str) -> bool {
    // Drive prefixes such as `C:` are legitimate on Windows
    let checked = if cfg!(windows) && has_drive_prefix(raw) {
        &raw[2..]
    } else {
        raw
    };
    checked
        .chars()
        .any(|c| c.is_control() || UNUSUAL_CHARACTERS.contains(&c))
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Normalize a path for comparison: [`resolve_path`], then case-fold on
/// case-insensitive platforms.
pub fn normalize_path(path: &Path) -> PathBuf {
    fold_case(resolve_path(path))
}

/// Expand `~`, make absolute, resolve `.`/`..` and symlinks in the existing
/// prefix. Case is kept. Never ends in a separator except for the root itself.
pub fn resolve_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };

    resolve_existing_prefix(&clean_path(&absolute))
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Clean a path without requiring it to exist
fn clean_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// that `/tmp/new/file` compares equal to `/private/tmp/new/file` on macOS
#[cfg(not(windows))]
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut remaining = Vec::new();

    while !current.exists() {
        let (Some(name), Some(parent)) = (current.file_name(), current.parent()) else {
            return path.to_path_buf();
        };
        remaining.push(name.to_owned());
        current = parent.to_path_buf();
    }

    let mut result = current.canonicalize().unwrap_or(current);
    for part in remaining.into_iter().rev() {
        result.push(part);
    }
    result
}

#[cfg(windows)]
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    path.to_path_buf()
}

const CASE_INSENSITIVE_FS: bool = cfg!(any(windows, target_os = "macos"));

fn fold_case(path: PathBuf) -> PathBuf {
    fold_case_with(path, CASE_INSENSITIVE_FS)
}

fn fold_case_with(path: PathBuf, case_insensitive: bool) -> PathBuf {
    if case_insensitive {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    } else {
        path
    }
}
