//! Directory allow-list with expiring grants

use super::validator::normalize_path;
use crate::config::SandboxConfig;
use crate::types::{DirectoryPermission, FileOperation, GrantedBy};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// User-home subdirectories readable by default
const DEFAULT_MEDIA_DIRS: &[&str] = &[
    "Documents",
    "Downloads",
    "Desktop",
    "Pictures",
    "Music",
    "Videos",
];

/// Optional settings for a new grant
#[derive(Debug, Clone, Default)]
pub struct GrantOptions {
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub granted_by: GrantedBy,
}

impl GrantOptions {
    pub fn system() -> Self {
        Self {
            expires_at: None,
            granted_by: GrantedBy::System,
        }
    }

    pub fn user_until(expires_at: Option<chrono::DateTime<chrono::Utc>>) -> Self {
        Self {
            expires_at,
            granted_by: GrantedBy::User,
        }
    }
}

/// Whitelisted directories keyed by normalized path
#[derive(Debug, Default)]
pub struct AccessRegistry {
    entries: Mutex<HashMap<PathBuf, DirectoryPermission>>,
}

impl AccessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the default system grants
    pub fn with_defaults(config: &SandboxConfig) -> Self {
        let registry = Self::new();
        let read_list: BTreeSet<FileOperation> =
            [FileOperation::Read, FileOperation::List].into_iter().collect();
        let full: BTreeSet<FileOperation> = FileOperation::ALL.into_iter().collect();

        if let Some(home) = dirs::home_dir() {
            for name in DEFAULT_MEDIA_DIRS {
                registry.add_to_whitelist(home.join(name), read_list.clone(), GrantOptions::system());
            }
        }

        if let Some(data_dir) = config.resolved_app_data_dir() {
            registry.add_to_whitelist(data_dir, full.clone(), GrantOptions::system());
        }

        registry.add_to_whitelist(std::env::temp_dir(), full, GrantOptions::system());
        registry.add_to_whitelist(
            config.resolved_working_directory(),
            read_list,
            GrantOptions::system(),
        );

        info!("Access registry seeded with {} default grants", registry.len());
        registry
    }

    /// Grant operations on a directory, replacing any existing grant for it
    pub fn add_to_whitelist(
        &self,
        dir: impl AsRef<Path>,
        permissions: BTreeSet<FileOperation>,
        options: GrantOptions,
    ) {
        let path = normalize_path(dir.as_ref());

        info!(
            "Granting {:?} on {:?} (by {:?}, expires {:?})",
            permissions, path, options.granted_by, options.expires_at
        );

        self.entries.lock().insert(
            path.clone(),
            DirectoryPermission {
                path,
                permissions,
                granted_at: chrono::Utc::now(),
                granted_by: options.granted_by,
                expires_at: options.expires_at,
            },
        );
    }

    /// Remove the grant for exactly this directory
    pub fn remove_from_whitelist(&self, dir: impl AsRef<Path>) -> bool {
        let path = normalize_path(dir.as_ref());
        let removed = self.entries.lock().remove(&path).is_some();
        if removed {
            info!("Revoked access to: {:?}", path);
        }
        removed
    }

    /// Whether `path` lies in a live grant that allows `operation`.
    /// Expired grants met along the way are removed.
    pub fn is_whitelisted(&self, path: impl AsRef<Path>, operation: FileOperation) -> bool {
        let target = normalize_path(path.as_ref());
        let now = chrono::Utc::now();
        let mut entries = self.entries.lock();

        let matching: Vec<PathBuf> = entries
            .keys()
            .filter(|dir| target.starts_with(dir))
            .cloned()
            .collect();

        for dir in matching {
            let Some(entry) = entries.get(&dir) else {
                continue;
            };
            if entry.is_expired_at(now) {
                debug!("Grant on {:?} expired, removing", dir);
                entries.remove(&dir);
                continue;
            }
            if entry.allows(operation) {
                return true;
            }
        }

        false
    }

    /// Remove every expired grant, returning how many were removed
    pub fn clear_expired_permissions(&self) -> usize {
        let now = chrono::Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            info!("Cleared {} expired grants", removed);
        }
        removed
    }

    /// Remove user grants, leaving system defaults intact
    pub fn clear_user_granted_permissions(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.granted_by != GrantedBy::User);
        let removed = before - entries.len();
        info!("Cleared {} user grants", removed);
        removed
    }

    /// Grant recorded for exactly this directory
    pub fn get_permission(&self, dir: impl AsRef<Path>) -> Option<DirectoryPermission> {
        let path = normalize_path(dir.as_ref());
        self.entries.lock().get(&path).cloned()
    }

    /// All grants, sorted by path
    pub fn entries(&self) -> Vec<DirectoryPermission> {
        let mut entries: Vec<_> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
