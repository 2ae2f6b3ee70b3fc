//! Group owners: one user per group chat who may manage folder monitors
//! for that group without being the bot owner.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

/// Persisted `groupId -> userId` map
pub struct GroupOwners {
    path: Option<PathBuf>,
    owners: Mutex<HashMap<String, String>>,
}

impl GroupOwners {
    /// Registry that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Load the owner file. A missing file is created empty; an unreadable
    /// one is logged and the registry starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let owners = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(owners) => owners,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid group owner file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Err(e) = write_owners(&path, &HashMap::new()) {
                    warn!(path = %path.display(), error = %e, "failed to create group owner file");
                }
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read group owner file, starting empty");
                HashMap::new()
            }
        };
        info!(count = owners.len(), "loaded group owners");
        Self {
            path: Some(path),
            owners: Mutex::new(owners),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn owner_of(&self, group_id: &str) -> Option<String> {
        self.lock().get(group_id).cloned()
    }

    pub fn is_owner(&self, group_id: &str, user_id: &str) -> bool {
        self.lock().get(group_id).is_some_and(|owner| owner == user_id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Make `user_id` the owner of `group_id`, returning the previous owner.
    /// Nothing changes if the file cannot be written.
    pub fn set_owner(&self, group_id: &str, user_id: &str) -> io::Result<Option<String>> {
        let mut owners = self.lock();
        let previous = owners.insert(group_id.to_string(), user_id.to_string());
        if let Err(e) = self.save(&owners) {
            match &previous {
                Some(previous) => owners.insert(group_id.to_string(), previous.clone()),
                None => owners.remove(group_id),
            };
            return Err(e);
        }
        info!(group_id, user_id, "group owner set");
        Ok(previous)
    }

    /// Remove the owner of `group_id`, returning who it was
    pub fn remove_owner(&self, group_id: &str) -> io::Result<Option<String>> {
        let mut owners = self.lock();
        let Some(previous) = owners.remove(group_id) else {
            return Ok(None);
        };
        if let Err(e) = self.save(&owners) {
            owners.insert(group_id.to_string(), previous);
            return Err(e);
        }
        info!(group_id, "group owner removed");
        Ok(Some(previous))
    }

    fn save(&self, owners: &HashMap<String, String>) -> io::Result<()> {
        match &self.path {
            Some(path) => write_owners(path, owners),
            None => Ok(()),
        }
    }
}

/// Atomic write: temp file first, then rename
fn write_owners(path: &Path, owners: &HashMap<String, String>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let ordered: BTreeMap<&String, &String> = owners.iter().collect();
    let content = serde_json::to_string_pretty(&ordered)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
