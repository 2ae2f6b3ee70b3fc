//! Shared test doubles for the auto-fetch integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Notify;

use sheetcourier::autofetch::{Delivery, FileDescriptor, FolderMapping, FolderMonitor, MappingStore};
use sheetcourier::config::AutoFetchSettings;
use sheetcourier::error::{CapabilityError, StoreError};
use sheetcourier::services::{ChatTransport, StorageBackend};

pub fn file(id: &str, name: &str) -> FileDescriptor {
    FileDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        modified_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
    }
}

/// Mapping store kept in memory, with an optional forced failure
#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<HashMap<String, FolderMapping>>,
    pub saves: Mutex<usize>,
    pub fail_saves: Mutex<bool>,
}

impl MemoryStore {
    pub fn with(mappings: Vec<FolderMapping>) -> Self {
        let store = Self::default();
        *store.saved.lock().unwrap() = mappings.into_iter().map(|m| (m.folder_id.clone(), m)).collect();
        store
    }

    pub fn saved(&self, folder_id: &str) -> Option<FolderMapping> {
        self.saved.lock().unwrap().get(folder_id).cloned()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, FolderMapping>, StoreError> {
        Ok(self.saved.lock().unwrap().clone())
    }

    async fn save_all(&self, mappings: &HashMap<String, FolderMapping>) -> Result<(), StoreError> {
        *self.saves.lock().unwrap() += 1;
        if *self.fail_saves.lock().unwrap() {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        *self.saved.lock().unwrap() = mappings.clone();
        Ok(())
    }
}

/// Scriptable drive storage. Folders listed in `accessible` pass validation;
/// `latest` holds what each listing returns (`Err` for a listing failure).
pub struct MockStorage {
    pub available: bool,
    pub accessible: Mutex<HashSet<String>>,
    pub latest: Mutex<HashMap<String, Result<Option<FileDescriptor>, String>>>,
    pub fail_downloads: Mutex<bool>,
    pub listings: Mutex<usize>,
    pub downloads: Mutex<Vec<String>>,
    /// When set, listings wait for this to be notified before returning
    pub hold: Mutex<Option<Arc<Notify>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            available: true,
            accessible: Mutex::new(HashSet::new()),
            latest: Mutex::new(HashMap::new()),
            fail_downloads: Mutex::new(false),
            listings: Mutex::new(0),
            downloads: Mutex::new(Vec::new()),
            hold: Mutex::new(None),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn allow(&self, folder_id: &str) {
        self.accessible.lock().unwrap().insert(folder_id.to_string());
    }

    pub fn set_latest(&self, folder_id: &str, latest: Option<FileDescriptor>) {
        self.latest.lock().unwrap().insert(folder_id.to_string(), Ok(latest));
    }

    pub fn set_listing_error(&self, folder_id: &str, message: &str) {
        self.latest
            .lock()
            .unwrap()
            .insert(folder_id.to_string(), Err(message.to_string()));
    }

    pub fn hold_listings(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn listing_count(&self) -> usize {
        *self.listings.lock().unwrap()
    }

    pub fn download_ids(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn latest_eligible_file(&self, folder_id: &str) -> Result<Option<FileDescriptor>, CapabilityError> {
        *self.listings.lock().unwrap() += 1;
        let hold = self.hold.lock().unwrap().clone();
        if let Some(hold) = hold {
            hold.notified().await;
        }
        match self.latest.lock().unwrap().get(folder_id) {
            Some(Ok(latest)) => Ok(latest.clone()),
            Some(Err(message)) => Err(CapabilityError::Transport(message.clone())),
            None => Err(CapabilityError::NotFound(folder_id.to_string())),
        }
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), CapabilityError> {
        self.downloads.lock().unwrap().push(file_id.to_string());
        // Leave a partial file behind so cleanup is observable
        std::fs::write(dest, b"partial")?;
        if *self.fail_downloads.lock().unwrap() {
            return Err(CapabilityError::NotFound(file_id.to_string()));
        }
        Ok(())
    }

    async fn validate_folder_access(&self, folder_id: &str) -> bool {
        self.accessible.lock().unwrap().contains(folder_id)
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

/// One recorded media send
#[derive(Debug, Clone)]
pub struct SentMedia {
    pub chat_id: String,
    pub path: PathBuf,
    pub caption: String,
    pub file_existed: bool,
}

/// Chat transport that records every send
#[derive(Default)]
pub struct MockTransport {
    pub media: Mutex<Vec<SentMedia>>,
    pub texts: Mutex<Vec<(String, String)>>,
    pub fail_sends: Mutex<bool>,
    /// Accept only numeric chat ids, like Telegram
    pub numeric_ids_only: Mutex<bool>,
}

impl MockTransport {
    pub fn sent_media(&self) -> Vec<SentMedia> {
        self.media.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_media(&self, chat_id: &str, file_path: &Path, caption: &str) -> Result<(), CapabilityError> {
        self.media.lock().unwrap().push(SentMedia {
            chat_id: chat_id.to_string(),
            path: file_path.to_path_buf(),
            caption: caption.to_string(),
            file_existed: file_path.exists(),
        });
        if *self.fail_sends.lock().unwrap() {
            return Err(CapabilityError::Transport("chat unreachable".to_string()));
        }
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), CapabilityError> {
        self.texts
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    fn validate_chat_id(&self, chat_id: &str) -> bool {
        !*self.numeric_ids_only.lock().unwrap() || chat_id.parse::<i64>().is_ok()
    }
}

/// A monitor wired to in-memory doubles
pub struct Harness {
    pub monitor: FolderMonitor,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MockStorage>,
    pub transport: Arc<MockTransport>,
    pub scratch: TempDir,
}

pub fn settings(max_retries: u32) -> AutoFetchSettings {
    AutoFetchSettings {
        check_interval_ms: 60_000,
        first_check_delay_ms: 2_000,
        max_retries,
        ..AutoFetchSettings::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(settings(3), MemoryStore::default(), MockStorage::new())
    }

    pub fn build(settings: AutoFetchSettings, store: MemoryStore, storage: MockStorage) -> Self {
        let store = Arc::new(store);
        let storage = Arc::new(storage);
        let transport = Arc::new(MockTransport::default());
        let scratch = TempDir::new().expect("Failed to create temp directory");
        let delivery = Delivery::new(storage.clone(), transport.clone(), scratch.path(), "Test Courier");
        let monitor = FolderMonitor::new(&settings, store.clone(), storage.clone(), delivery);
        Self {
            monitor,
            store,
            storage,
            transport,
            scratch,
        }
    }

    /// Number of files left in the scratch directory
    pub fn scratch_files(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

/// Poll `condition` until it holds, giving background tasks time to finish
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub const MINUTE: Duration = Duration::from_secs(60);
