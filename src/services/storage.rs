use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::autofetch::FileDescriptor;
use crate::error::CapabilityError;

/// Drive storage capability consumed by the folder monitor
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Most recently modified eligible file in the folder, if any
    async fn latest_eligible_file(&self, folder_id: &str) -> Result<Option<FileDescriptor>, CapabilityError>;

    /// Download file `file_id` to `dest`
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), CapabilityError>;

    /// Whether the folder exists and can be read
    async fn validate_folder_access(&self, folder_id: &str) -> bool;

    /// Whether the backend is configured and usable at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Drive folders exposed as sub-directories of a locally synced root
pub struct LocalDriveStorage {
    root: Option<PathBuf>,
    eligible_extensions: Vec<String>,
}

impl LocalDriveStorage {
    pub fn new(root: Option<PathBuf>, eligible_extensions: &[String]) -> Self {
        Self {
            root,
            eligible_extensions: eligible_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    fn root(&self) -> Result<&Path, CapabilityError> {
        self.root.as_deref().ok_or(CapabilityError::NotConfigured)
    }

    /// Resolve a folder id to its directory, rejecting anything that could escape the root
    fn folder_path(&self, folder_id: &str) -> Result<PathBuf, CapabilityError> {
        let root = self.root()?;
        let invalid = folder_id.is_empty()
            || folder_id == "."
            || folder_id == ".."
            || folder_id.contains(['/', '\\'])
            || folder_id.contains('\0');
        if invalid {
            return Err(CapabilityError::InvalidFolder(folder_id.to_string()));
        }
        Ok(root.join(folder_id))
    }

    /// File ids are `<folder>/<name>` so a download can find the file again
    fn file_path(&self, file_id: &str) -> Result<PathBuf, CapabilityError> {
        let (folder_id, rest) = file_id
            .split_once('/')
            .ok_or_else(|| CapabilityError::NotFound(file_id.to_string()))?;
        let (name, _version) = rest
            .rsplit_once('#')
            .ok_or_else(|| CapabilityError::NotFound(file_id.to_string()))?;
        let folder = self.folder_path(folder_id)?;
        let safe_name = Path::new(name)
            .file_name()
            .ok_or_else(|| CapabilityError::NotFound(file_id.to_string()))?;
        Ok(folder.join(safe_name))
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.eligible_extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Short version tag of a file: first 16 hex chars of SHA-256 over name and mtime
pub fn version_tag(name: &str, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(nanos.to_le_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[async_trait]
impl StorageBackend for LocalDriveStorage {
    async fn latest_eligible_file(&self, folder_id: &str) -> Result<Option<FileDescriptor>, CapabilityError> {
        let folder = self.folder_path(folder_id)?;
        let mut entries = tokio::fs::read_dir(&folder).await?;

        let mut latest: Option<(SystemTime, String)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() || !self.is_eligible(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let newer = match &latest {
                None => true,
                Some((best_time, best_name)) => {
                    modified > *best_time || (modified == *best_time && name > *best_name)
                }
            };
            if newer {
                latest = Some((modified, name));
            }
        }

        Ok(latest.map(|(modified, name)| FileDescriptor {
            id: format!("{}/{}#{}", folder_id, name, version_tag(&name, modified)),
            modified_time: DateTime::<Utc>::from(modified),
            name,
        }))
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), CapabilityError> {
        let src = self.file_path(file_id)?;
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            return Err(CapabilityError::NotFound(file_id.to_string()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dest).await?;
        Ok(())
    }

    async fn validate_folder_access(&self, folder_id: &str) -> bool {
        let Ok(folder) = self.folder_path(folder_id) else {
            return false;
        };
        match tokio::fs::metadata(&folder).await {
            Ok(m) => m.is_dir() && tokio::fs::read_dir(&folder).await.is_ok(),
            Err(_) => false,
        }
    }

    fn is_available(&self) -> bool {
        self.root.as_deref().map(Path::is_dir).unwrap_or(false)
    }
}
