//! File system operations gated by validation, grants and consent

use super::consent::{ConsentCoordinator, ConsentGate, ConsentRequest};
use super::permissions::AccessRegistry;
use super::validator::PathValidator;
use crate::audit::{AuditSink, FileAccessContext};
use crate::config::SandboxConfig;
use crate::error::{Error, Result, SandboxError};
use crate::types::*;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const REASON_WHITELISTED: &str = "Directory is whitelisted";
pub const REASON_USER_GRANTED: &str = "User granted access";
pub const REASON_NOT_GRANTED: &str = "Directory is not whitelisted and user did not grant access";

/// Options for an access check
#[derive(Debug, Clone, Default)]
pub struct AccessOptions {
    /// Shown to the user if a consent prompt is needed
    pub reason: Option<String>,
    pub skip_prompt: bool,
    /// Caller identity recorded in the audit trail
    pub source: Option<String>,
}

/// Options for a gated operation
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    pub timeout: Option<Duration>,
    pub access: AccessOptions,
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub max_size: Option<u64>,
    pub operation: OperationOptions,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Unix permission bits applied after the write
    pub mode: Option<u32>,
    pub max_size: Option<u64>,
    pub operation: OperationOptions,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub recursive: bool,
    pub max_entries: Option<usize>,
    pub operation: OperationOptions,
}

/// Gate for every file operation a tool performs
pub struct FileOperationGateway {
    validator: Arc<PathValidator>,
    registry: Arc<AccessRegistry>,
    consent: Option<ConsentCoordinator>,
    audit: Arc<dyn AuditSink>,
    enable_user_prompts: bool,
    max_file_size: u64,
    max_list_entries: usize,
    operation_timeout: Duration,
}

impl FileOperationGateway {
    /// Create a gateway without a consent gate; unknown directories are denied
    pub fn new(
        config: &SandboxConfig,
        validator: Arc<PathValidator>,
        registry: Arc<AccessRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator,
            registry,
            consent: None,
            audit,
            enable_user_prompts: config.enable_user_prompts,
            max_file_size: config.max_file_size,
            max_list_entries: config.max_list_entries,
            operation_timeout: config.operation_timeout(),
        }
    }

    /// Attach the gate used to ask for access outside existing grants
    pub fn with_consent_gate(mut self, gate: Arc<dyn ConsentGate>) -> Self {
        self.consent = Some(ConsentCoordinator::new(gate, Arc::clone(&self.registry)));
        self
    }

    pub fn registry(&self) -> &Arc<AccessRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &Arc<PathValidator> {
        &self.validator
    }

    /// Decide whether `operation` on `path` is allowed.
    ///
    /// Never fails: denial is reported in the returned result. An invalid
    /// path is denied without consulting grants or prompting.
    pub async fn check_access(
        &self,
        path: impl AsRef<Path>,
        operation: FileOperation,
        options: &AccessOptions,
    ) -> FileAccessResult {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        let validation = self.validator.validate(path);

        if !validation.valid {
            let reason = format!("Path validation failed: {}", validation.issue_summary());
            return self.record(
                FileAccessResult {
                    allowed: false,
                    path: display,
                    resolved_path: validation.resolved_path,
                    normalized_path: validation.normalized_path,
                    operation,
                    reason,
                    is_blocked: validation.is_blocked,
                    requires_prompt: false,
                },
                options,
            );
        }

        let resolved = validation.resolved_path;
        let normalized = validation.normalized_path;

        if self.registry.is_whitelisted(&normalized, operation) {
            return self.record(
                Self::allowed(display, resolved, normalized, operation, REASON_WHITELISTED),
                options,
            );
        }

        let prompts = self.enable_user_prompts && !options.skip_prompt;
        if prompts {
            if let Some(consent) = &self.consent {
                let request = ConsentRequest {
                    directory: consent_directory(&resolved, operation),
                    operation,
                    reason: options.reason.clone(),
                    source: options.source.clone(),
                };
                if consent.request(request).await.is_granted() {
                    return self.record(
                        Self::allowed(display, resolved, normalized, operation, REASON_USER_GRANTED),
                        options,
                    );
                }
            }
        }

        self.record(
            FileAccessResult {
                allowed: false,
                path: display,
                resolved_path: resolved,
                normalized_path: normalized,
                operation,
                reason: REASON_NOT_GRANTED.to_string(),
                is_blocked: false,
                requires_prompt: prompts,
            },
            options,
        )
    }

    fn allowed(
        path: String,
        resolved_path: PathBuf,
        normalized_path: PathBuf,
        operation: FileOperation,
        reason: &str,
    ) -> FileAccessResult {
        FileAccessResult {
            allowed: true,
            path,
            resolved_path,
            normalized_path,
            operation,
            reason: reason.to_string(),
            is_blocked: false,
            requires_prompt: false,
        }
    }

    fn record(&self, result: FileAccessResult, options: &AccessOptions) -> FileAccessResult {
        debug!(
            "{} {} on {:?}: {}",
            if result.allowed { "Allowed" } else { "Denied" },
            result.operation,
            result.path,
            result.reason
        );
        self.audit.log_file_access(
            &result.path,
            result.operation,
            result.allowed,
            &FileAccessContext {
                reason: result.reason.clone(),
                source: options.source.clone(),
                is_blocked: result.is_blocked,
            },
        );
        result
    }

    /// Check access, then run `executor` on the resolved path under a timeout
    pub async fn execute_operation<T, F, Fut>(
        &self,
        path: impl AsRef<Path>,
        operation: FileOperation,
        options: &OperationOptions,
        executor: F,
    ) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let access = self.check_access(path, operation, &options.access).await;
        if !access.allowed {
            return Err(Error::Sandbox(SandboxError::AccessDenied {
                path: access.path,
                operation,
                reason: access.reason,
                is_blocked: access.is_blocked,
            }));
        }

        let timeout = options.timeout.unwrap_or(self.operation_timeout);
        match tokio::time::timeout(timeout, executor(access.resolved_path)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(Error::Sandbox(SandboxError::OperationFailed {
                operation,
                path: access.path,
                source: Box::new(source),
            })),
            Err(_) => Err(Error::Sandbox(SandboxError::OperationTimeout {
                operation,
                path: access.path,
                timeout_ms: timeout.as_millis() as u64,
            })),
        }
    }

    /// Read a file, refusing anything larger than the size limit
    pub async fn read_file(&self, path: impl AsRef<Path>, options: &ReadOptions) -> Result<Vec<u8>> {
        let max_size = options.max_size.unwrap_or(self.max_file_size);

        self.execute_operation(path, FileOperation::Read, &options.operation, |target| async move {
            let metadata = fs::metadata(&target)
                .await
                .map_err(|e| not_found_or_io(e, &target))?;
            if metadata.is_dir() {
                return Err(Error::Sandbox(SandboxError::InvalidPath(format!(
                    "{:?} is a directory",
                    target
                ))));
            }
            if metadata.len() > max_size {
                return Err(too_large(&target, metadata.len(), max_size));
            }

            debug!("Reading file: {:?}", target);

            // The file may grow between stat and read
            let file = fs::File::open(&target).await?;
            let mut content = Vec::with_capacity(metadata.len() as usize);
            file.take(max_size + 1).read_to_end(&mut content).await?;
            if content.len() as u64 > max_size {
                return Err(too_large(&target, content.len() as u64, max_size));
            }

            Ok(content)
        })
        .await
    }

    /// Read a UTF-8 text file
    pub async fn read_text_file(&self, path: impl AsRef<Path>, options: &ReadOptions) -> Result<String> {
        let bytes = self.read_file(path, options).await?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Write a file, creating parent directories as needed.
    ///
    /// Checked as `create` when the file does not exist yet, otherwise as
    /// `write`. Content over the size limit is rejected before any check.
    pub async fn write_file(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> Result<FileWriteResult> {
        let path = path.as_ref();
        let content = content.as_ref();
        let max_size = options.max_size.unwrap_or(self.max_file_size);

        if content.len() as u64 > max_size {
            return Err(too_large(path, content.len() as u64, max_size));
        }

        let existed_before = fs::try_exists(self.validator.resolve(path))
            .await
            .unwrap_or(false);
        let operation = if existed_before {
            FileOperation::Write
        } else {
            FileOperation::Create
        };
        let mode = options.mode;

        self.execute_operation(path, operation, &options.operation, |target| async move {
            debug!("Writing file: {:?}", target);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }

            let hash_before = if existed_before {
                Some(Self::compute_file_hash(&target).await?)
            } else {
                None
            };

            fs::write(&target, content).await?;
            apply_mode(&target, mode).await?;

            let hash_after = Self::compute_file_hash(&target).await?;
            let size = content.len() as u64;

            info!("Wrote {} bytes to {:?}", size, target);

            Ok(FileWriteResult {
                path: target.to_string_lossy().to_string(),
                created: !existed_before,
                size,
                hash_before,
                hash_after,
            })
        })
        .await
    }

    /// Delete a single file
    pub async fn delete_file(&self, path: impl AsRef<Path>, options: &OperationOptions) -> Result<()> {
        self.execute_operation(path, FileOperation::Delete, options, |target| async move {
            let metadata = fs::metadata(&target)
                .await
                .map_err(|e| not_found_or_io(e, &target))?;
            if metadata.is_dir() {
                return Err(Error::Sandbox(SandboxError::InvalidPath(format!(
                    "{:?} is a directory",
                    target
                ))));
            }

            fs::remove_file(&target).await?;
            info!("Deleted: {:?}", target);
            Ok(())
        })
        .await
    }

    /// Create a directory and any missing parents
    pub async fn create_directory(&self, path: impl AsRef<Path>, options: &OperationOptions) -> Result<()> {
        self.execute_operation(path, FileOperation::Create, options, |target| async move {
            fs::create_dir_all(&target).await?;
            info!("Created directory: {:?}", target);
            Ok(())
        })
        .await
    }

    /// Metadata of a file or directory
    pub async fn get_metadata(&self, path: impl AsRef<Path>, options: &OperationOptions) -> Result<FileMetadata> {
        self.execute_operation(path, FileOperation::Read, options, |target| async move {
            let metadata = fs::metadata(&target)
                .await
                .map_err(|e| not_found_or_io(e, &target))?;
            Ok(FileMetadata::from_fs(&target, &metadata))
        })
        .await
    }

    /// List a directory, optionally recursively, never collecting more than
    /// `max_entries` entries
    pub async fn list_directory(&self, path: impl AsRef<Path>, options: &ListOptions) -> Result<Vec<FileMetadata>> {
        let max_entries = options.max_entries.unwrap_or(self.max_list_entries);
        let recursive = options.recursive;

        self.execute_operation(path, FileOperation::List, &options.operation, |target| async move {
            let metadata = fs::metadata(&target).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Sandbox(SandboxError::DirectoryNotFound(
                        target.to_string_lossy().to_string(),
                    ))
                } else {
                    Error::Io(e)
                }
            })?;
            if !metadata.is_dir() {
                return Err(Error::Sandbox(SandboxError::InvalidPath(format!(
                    "{:?} is not a directory",
                    target
                ))));
            }

            debug!("Listing directory: {:?} (recursive: {})", target, recursive);

            if recursive {
                tokio::task::spawn_blocking(move || walk_bounded(&target, max_entries))
                    .await
                    .map_err(|e| Error::Internal(format!("directory walk failed: {}", e)))
            } else {
                list_flat(&target, max_entries).await
            }
        })
        .await
    }

    /// Compute SHA256 hash of a file
    pub async fn compute_file_hash(path: impl AsRef<Path>) -> Result<String> {
        let mut file = fs::File::open(path.as_ref()).await?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Directory a consent prompt should name for this access
fn consent_directory(path: &Path, operation: FileOperation) -> PathBuf {
    if operation == FileOperation::List || path.is_dir() {
        return path.to_path_buf();
    }
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

async fn list_flat(path: &Path, max_entries: usize) -> Result<Vec<FileMetadata>> {
    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(path).await?;

    while entries.len() < max_entries {
        let Some(entry) = read_dir.next_entry().await? else {
            break;
        };
        let metadata = entry.metadata().await?;
        entries.push(FileMetadata::from_fs(&entry.path(), &metadata));
    }

    // Sort: directories first, then by name
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(entries)
}

/// Depth-first walk that stops as soon as `max_entries` are collected
fn walk_bounded(root: &Path, max_entries: usize) -> Vec<FileMetadata> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            entry
                .metadata()
                .ok()
                .map(|metadata| FileMetadata::from_fs(entry.path(), &metadata))
        })
        .take(max_entries)
        .collect()
}

fn not_found_or_io(err: std::io::Error, path: &Path) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::Sandbox(SandboxError::FileNotFound(path.to_string_lossy().to_string()))
    } else {
        Error::Io(err)
    }
}

fn too_large(path: &Path, size: u64, max: u64) -> Error {
    Error::Sandbox(SandboxError::FileTooLarge {
        path: path.to_string_lossy().to_string(),
        size,
        max,
    })
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    if mode.is_some() {
        debug!("Ignoring file mode for {:?} on this platform", path);
    }
    Ok(())
}
