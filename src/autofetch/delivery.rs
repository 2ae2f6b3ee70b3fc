use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{FileDescriptor, FolderMapping};
use crate::services::{ChatTransport, StorageBackend};
use crate::utils::format::{format_local_time, safe_prefix, truncate_id};

/// Downloads a detected file to a scratch path and sends it to the mapped chat
pub struct Delivery {
    storage: Arc<dyn StorageBackend>,
    transport: Arc<dyn ChatTransport>,
    scratch_dir: PathBuf,
    bot_name: String,
}

/// Scratch file removed when dropped, so every exit path cleans up
struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove scratch file");
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Delivery {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        transport: Arc<dyn ChatTransport>,
        scratch_dir: impl Into<PathBuf>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            transport,
            scratch_dir: scratch_dir.into(),
            bot_name: bot_name.into(),
        }
    }

    /// Deliver `file` to the mapping's chat. Errors are logged and reported as `false`.
    pub async fn deliver(&self, mapping: &FolderMapping, file: &FileDescriptor) -> bool {
        let path = self
            .scratch_dir
            .join(scratch_file_name(&mapping.folder_id, &file.name, Utc::now()));
        let scratch = ScratchFile::new(path);

        info!(folder_id = %mapping.folder_id, file = %file.name, "downloading file for delivery");
        if let Err(e) = self.storage.download_file(&file.id, &scratch.path).await {
            warn!(folder_id = %mapping.folder_id, file = %file.name, error = %e, "download failed");
            scratch.remove().await;
            return false;
        }

        let caption = build_caption(&self.bot_name, mapping, file);
        let sent = self
            .transport
            .send_media(&mapping.chat_id, &scratch.path, &caption)
            .await;
        scratch.remove().await;

        match sent {
            Ok(()) => {
                info!(
                    folder_id = %mapping.folder_id,
                    chat_id = %mapping.chat_id,
                    file = %file.name,
                    "file delivered"
                );
                true
            }
            Err(e) => {
                warn!(
                    folder_id = %mapping.folder_id,
                    chat_id = %mapping.chat_id,
                    error = %e,
                    "sending file to chat failed"
                );
                false
            }
        }
    }
}

/// Unique scratch name: timestamp, folder id fragment and the sanitized file name
pub fn scratch_file_name(folder_id: &str, file_name: &str, now: DateTime<Utc>) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect()
    };
    format!(
        "autofetch_{}_{}_{}",
        now.timestamp_millis(),
        sanitize(safe_prefix(folder_id, 8)),
        sanitize(base)
    )
}

/// Caption attached to a delivered file
pub fn build_caption(bot_name: &str, mapping: &FolderMapping, file: &FileDescriptor) -> String {
    format!(
        "📊 Auto-Delivered Spreadsheet\n\n\
         📁 File: {}\n\
         📅 Modified: {}\n\
         🔄 Auto-Fetch: {}\n\
         📂 Folder: {}\n\
         🤖 Delivered by {}",
        file.name,
        format_local_time(&file.modified_time),
        mapping.nickname,
        truncate_id(&mapping.folder_id, 12),
        bot_name,
    )
}
