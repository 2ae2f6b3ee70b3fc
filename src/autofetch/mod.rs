//! Folder auto-fetch: watches drive folders and delivers the newest
//! spreadsheet in each one to its mapped chat.
//!
//! [`FolderMonitor`] owns the mapping set and one polling task per active
//! folder. Mappings are persisted in full through a [`MappingStore`] after
//! every mutation.

mod delivery;
mod lifecycle;
mod monitor;
mod store;

pub use delivery::{build_caption, scratch_file_name, Delivery};
pub use monitor::{FolderMonitor, PollOutcome};
pub use store::{JsonFileStore, MappingStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::format::safe_prefix;

/// A file found in a remote folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
}

/// Association between one remote folder and one destination chat,
/// plus its monitoring state.
///
/// The record is persisted keyed by folder id, so `folder_id` itself is not
/// serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderMapping {
    #[serde(skip)]
    pub folder_id: String,
    pub chat_id: String,
    pub nickname: String,
    /// `None` until the first successful delivery
    #[serde(default)]
    pub last_file_id: Option<String>,
    #[serde(default)]
    pub last_file_name: Option<String>,
    #[serde(rename = "lastCheck")]
    pub last_check_time: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(rename = "sendFirstFile", default)]
    pub send_first_file: bool,
    /// Bumped on every pause/resume so a cycle started before the toggle can tell
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl FolderMapping {
    /// New active mapping that will deliver whatever file is latest on its first poll
    pub fn new(folder_id: &str, chat_id: &str, nickname: Option<&str>) -> Self {
        let now = Utc::now();
        let nickname = nickname
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| default_nickname(folder_id));
        Self {
            folder_id: folder_id.to_string(),
            chat_id: chat_id.to_string(),
            nickname,
            last_file_id: None,
            last_file_name: None,
            last_check_time: now,
            added_at: now,
            is_active: true,
            retry_count: 0,
            send_first_file: true,
            generation: 0,
        }
    }

    /// Whether `file` should be delivered: either nothing was ever delivered
    /// and the first-file flag is still set, or the latest file changed.
    pub fn is_new_file(&self, file: &FileDescriptor) -> bool {
        let first_delivery = self.send_first_file && self.last_file_id.is_none();
        first_delivery || self.last_file_id.as_deref() != Some(file.id.as_str())
    }
}

/// Nickname used when none is supplied: `auto_` plus the first 8 characters of the folder id
pub fn default_nickname(folder_id: &str) -> String {
    format!("auto_{}", safe_prefix(folder_id, 8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: format!("{id}.xlsx"),
            modified_time: Utc::now(),
        }
    }

    #[test]
    fn test_new_mapping_defaults() {
        let mapping = FolderMapping::new("1BxiMVs0XRA5nFMd", "123@c.us", None);
        assert_eq!(mapping.nickname, "auto_1BxiMVs0");
        assert!(mapping.is_active);
        assert!(mapping.send_first_file);
        assert_eq!(mapping.retry_count, 0);
        assert!(mapping.last_file_id.is_none());
        assert!(mapping.last_file_name.is_none());
    }

    #[test]
    fn test_blank_nickname_falls_back() {
        let mapping = FolderMapping::new("reports", "1", Some("  "));
        assert_eq!(mapping.nickname, "auto_reports");
        let mapping = FolderMapping::new("reports", "1", Some("weekly"));
        assert_eq!(mapping.nickname, "weekly");
    }

    #[test]
    fn test_is_new_file() {
        let mut mapping = FolderMapping::new("F1", "C1", None);
        assert!(mapping.is_new_file(&file("v1")));

        mapping.last_file_id = Some("v1".to_string());
        mapping.send_first_file = false;
        assert!(!mapping.is_new_file(&file("v1")));
        assert!(mapping.is_new_file(&file("v2")));
    }

    #[test]
    fn test_persisted_field_names() {
        let mapping = FolderMapping::new("F1", "C1", Some("nick"));
        let json = serde_json::to_value(&mapping).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "chatId",
            "nickname",
            "lastFileId",
            "lastFileName",
            "lastCheck",
            "addedAt",
            "isActive",
            "retryCount",
            "sendFirstFile",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert!(!obj.contains_key("folderId"));
        assert!(!obj.contains_key("generation"));
        assert!(obj["lastFileId"].is_null());
    }
}
