use std::collections::hash_map::Entry;
use std::collections::BTreeMap;

use tracing::{info, warn};

use super::monitor::lock;
use super::{FileDescriptor, FolderMapping, FolderMonitor};
use crate::error::MappingError;
use crate::utils::format::{format_interval, format_local_time};

impl FolderMonitor {
    /// Register a new folder -> chat mapping and start monitoring it right away.
    ///
    /// The first poll delivers whatever file is currently latest in the folder.
    pub async fn add_mapping(
        &self,
        folder_id: &str,
        chat_id: &str,
        nickname: Option<&str>,
    ) -> Result<FolderMapping, MappingError> {
        if lock(&self.inner.mappings).contains_key(folder_id) {
            return Err(MappingError::DuplicateFolder(folder_id.to_string()));
        }
        if !self.inner.storage.is_available() {
            return Err(MappingError::StorageUnavailable);
        }
        if !self.inner.storage.validate_folder_access(folder_id).await {
            return Err(MappingError::FolderInaccessible(folder_id.to_string()));
        }

        let mapping = FolderMapping::new(folder_id, chat_id, nickname);
        match lock(&self.inner.mappings).entry(folder_id.to_string()) {
            // Added concurrently while folder access was being validated
            Entry::Occupied(_) => return Err(MappingError::DuplicateFolder(folder_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(mapping.clone());
            }
        }
        let _ = self.inner.persist().await;
        self.start_monitoring(folder_id);

        info!(folder_id, chat_id, nickname = %mapping.nickname, "auto-fetch mapping added");
        Ok(mapping)
    }

    /// Stop monitoring a folder and delete its mapping
    pub async fn remove_mapping(&self, folder_id: &str) -> Result<FolderMapping, MappingError> {
        if !lock(&self.inner.mappings).contains_key(folder_id) {
            return Err(MappingError::NotFound(folder_id.to_string()));
        }
        self.stop_monitoring(folder_id);
        let removed = lock(&self.inner.mappings).remove(folder_id);
        let Some(removed) = removed else {
            return Err(MappingError::NotFound(folder_id.to_string()));
        };
        self.inner.forget_gate(folder_id);
        let _ = self.inner.persist().await;

        info!(folder_id, "auto-fetch mapping removed");
        Ok(removed)
    }

    /// Pause or resume a mapping. Resuming resets the retry counter.
    pub async fn toggle_monitoring(&self, folder_id: &str, active: bool) -> Result<FolderMapping, MappingError> {
        let updated = {
            let mut mappings = lock(&self.inner.mappings);
            let Some(mapping) = mappings.get_mut(folder_id) else {
                return Err(MappingError::NotFound(folder_id.to_string()));
            };
            mapping.is_active = active;
            mapping.generation = mapping.generation.wrapping_add(1);
            if active {
                mapping.retry_count = 0;
            }
            mapping.clone()
        };

        if active {
            self.start_monitoring(folder_id);
        } else {
            self.stop_monitoring(folder_id);
        }
        let _ = self.inner.persist().await;

        info!(folder_id, active, "auto-fetch monitoring toggled");
        Ok(updated)
    }

    /// Send the folder's current latest file to its chat on demand.
    ///
    /// Works for paused mappings too. The last delivered file and the retry
    /// state are left alone, so the timer still reports the same file as new
    /// if it has not delivered it yet. `Ok(None)` means the folder is empty.
    pub async fn fetch_latest(&self, folder_id: &str) -> Result<Option<FileDescriptor>, MappingError> {
        if !lock(&self.inner.mappings).contains_key(folder_id) {
            return Err(MappingError::NotFound(folder_id.to_string()));
        }
        if !self.inner.storage.is_available() {
            return Err(MappingError::StorageUnavailable);
        }

        let gate = self.inner.poll_gate(folder_id);
        let _guard = gate.lock().await;
        let Some(mapping) = lock(&self.inner.mappings).get(folder_id).cloned() else {
            return Err(MappingError::NotFound(folder_id.to_string()));
        };

        let latest = match self.inner.storage.latest_eligible_file(folder_id).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(folder_id, error = %e, "on-demand fetch could not list folder");
                return Err(MappingError::FetchFailed(folder_id.to_string()));
            }
        };
        let Some(file) = latest else {
            return Ok(None);
        };
        if !self.inner.delivery.deliver(&mapping, &file).await {
            return Err(MappingError::FetchFailed(folder_id.to_string()));
        }

        info!(folder_id, file = %file.name, "latest file fetched on demand");
        Ok(Some(file))
    }

    /// Snapshot of every mapping, ordered by folder id
    pub fn list_mappings(&self) -> BTreeMap<String, FolderMapping> {
        lock(&self.inner.mappings)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Find a folder by id, falling back to a nickname match
    pub fn resolve_folder(&self, identifier: &str) -> Option<String> {
        let mappings = lock(&self.inner.mappings);
        if mappings.contains_key(identifier) {
            return Some(identifier.to_string());
        }
        let mut matches: Vec<&String> = mappings
            .iter()
            .filter(|(_, m)| m.nickname.eq_ignore_ascii_case(identifier))
            .map(|(id, _)| id)
            .collect();
        matches.sort();
        matches.first().map(|id| id.to_string())
    }

    /// Operator-facing listing of all mappings
    pub fn format_mapping_list(&self) -> String {
        let mappings = self.list_mappings();
        if mappings.is_empty() {
            return "🔄 Auto-Fetch Mappings\n\n\
                    No auto-fetch mappings configured.\n\n\
                    Use setfolder <folderId> [chatId] [nickname] to set up automatic delivery."
                .to_string();
        }

        let mut list = String::from("🔄 Auto-Fetch Mappings\n\n");
        for (index, (folder_id, mapping)) in mappings.iter().enumerate() {
            list.push_str(&format!("{}. {}\n", index + 1, mapping.nickname));
            list.push_str(&format!("   📁 Folder: {}\n", folder_id));
            list.push_str(&format!("   💬 Chat: {}\n", mapping.chat_id));
            list.push_str(&format!(
                "   📄 Last File: {}\n",
                mapping.last_file_name.as_deref().unwrap_or("None")
            ));
            list.push_str(&format!("   🕐 Last Check: {}\n", format_local_time(&mapping.last_check_time)));
            let status = if mapping.is_active {
                "Active".to_string()
            } else if mapping.retry_count >= self.max_retries() {
                format!("Paused after {} failed checks", mapping.retry_count)
            } else {
                "Paused".to_string()
            };
            list.push_str(&format!("   ✅ Status: {}\n\n", status));
        }
        list.push_str(&format!("⏱️ Check Interval: {}\n", format_interval(self.check_interval())));
        list.push_str(&format!("🔄 Active Monitors: {}", self.active_monitor_count()));
        list
    }
}
