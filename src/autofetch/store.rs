use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::FolderMapping;
use crate::error::StoreError;

/// Durable storage for the full mapping set, keyed by folder id
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Load every persisted mapping. A store that was never written yields an empty set.
    async fn load_all(&self) -> Result<HashMap<String, FolderMapping>, StoreError>;

    /// Replace the persisted set with `mappings`
    async fn save_all(&self, mappings: &HashMap<String, FolderMapping>) -> Result<(), StoreError>;
}

/// JSON document of `folderId -> mapping record`, rewritten atomically on every save
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes overlapping saves so a temp file is never shared
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file exists yet
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl MappingStore for JsonFileStore {
    async fn load_all(&self) -> Result<HashMap<String, FolderMapping>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let mut mappings: HashMap<String, FolderMapping> = serde_json::from_str(&content)?;
        for (folder_id, mapping) in mappings.iter_mut() {
            mapping.folder_id = folder_id.clone();
        }
        Ok(mappings)
    }

    async fn save_all(&self, mappings: &HashMap<String, FolderMapping>) -> Result<(), StoreError> {
        // Sorted keys keep the file diff-friendly
        let ordered: std::collections::BTreeMap<&String, &FolderMapping> = mappings.iter().collect();
        let json = serde_json::to_string_pretty(&ordered)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.temp_path();
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(folder_id: &str) -> FolderMapping {
        let mut mapping = FolderMapping::new(folder_id, "120363@g.us", None);
        mapping.last_file_id = Some("v1".to_string());
        mapping.last_file_name = Some("report.xlsx".to_string());
        mapping.retry_count = 2;
        mapping.send_first_file = false;
        mapping
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("none.json"));
        assert!(!store.exists().await);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp.path().join("data").join("mappings.json"));

        let mut mappings = HashMap::new();
        for id in ["F1", "F2"] {
            mappings.insert(id.to_string(), sample(id));
        }
        let mut paused = FolderMapping::new("F3", "42", Some("paused"));
        paused.is_active = false;
        mappings.insert("F3".to_string(), paused);

        store.save_all(&mappings).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, mappings);
        assert!(!temp.path().join("data").join("mappings.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mappings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load_all().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_valid_document() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(temp.path().join("m.json")));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mappings = HashMap::new();
                let id = format!("F{i}");
                mappings.insert(id.clone(), sample(&id));
                store.save_all(&mappings).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
