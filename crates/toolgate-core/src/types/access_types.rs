//! File access and directory grant types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// File operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    List,
}

impl FileOperation {
    pub const ALL: [FileOperation; 5] = [
        FileOperation::Read,
        FileOperation::Write,
        FileOperation::Create,
        FileOperation::Delete,
        FileOperation::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }

    /// Read and list never modify the file system
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Read | Self::List)
    }

    /// Permission set granted when a user approves this operation
    pub fn consent_grant(&self) -> BTreeSet<FileOperation> {
        if self.is_read_only() {
            [FileOperation::Read, FileOperation::List].into_iter().collect()
        } else {
            FileOperation::ALL.into_iter().collect()
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperation {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            "list" => Ok(Self::List),
            other => Err(crate::error::Error::Config(format!(
                "unknown file operation: {}",
                other
            ))),
        }
    }
}

/// Who created a directory grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantedBy {
    System,
    User,
}

impl Default for GrantedBy {
    fn default() -> Self {
        Self::User
    }
}

/// A whitelisted directory and the operations allowed beneath it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryPermission {
    pub path: PathBuf,
    pub permissions: BTreeSet<FileOperation>,
    pub granted_at: chrono::DateTime<chrono::Utc>,
    pub granted_by: GrantedBy,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DirectoryPermission {
    pub fn allows(&self, operation: FileOperation) -> bool {
        self.permissions.contains(&operation)
    }

    pub fn is_expired_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessResult {
    pub allowed: bool,
    pub path: String,
    /// Case-preserving path that operations act on
    pub resolved_path: PathBuf,
    /// Key used for validation and grant lookups
    pub normalized_path: PathBuf,
    pub operation: FileOperation,
    pub reason: String,
    pub is_blocked: bool,
    pub requires_prompt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_grant_sets() {
        let read = FileOperation::Read.consent_grant();
        assert_eq!(read.len(), 2);
        assert!(read.contains(&FileOperation::List));
        assert!(!read.contains(&FileOperation::Write));

        let delete = FileOperation::Delete.consent_grant();
        assert_eq!(delete.len(), FileOperation::ALL.len());
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("LIST".parse::<FileOperation>().unwrap(), FileOperation::List);
        assert!("execute".parse::<FileOperation>().is_err());
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = chrono::Utc::now();
        let entry = DirectoryPermission {
            path: PathBuf::from("/data"),
            permissions: FileOperation::ALL.into_iter().collect(),
            granted_at: now,
            granted_by: GrantedBy::User,
            expires_at: Some(now),
        };
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + chrono::Duration::milliseconds(1)));
    }
}
