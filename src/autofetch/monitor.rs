use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{Delivery, FileDescriptor, FolderMapping, MappingStore};
use crate::config::AutoFetchSettings;
use crate::error::{PollError, StoreError};
use crate::services::StorageBackend;

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Mapping missing or inactive; nothing was done
    Skipped,
    /// Folder has no eligible file
    Empty,
    /// Latest file was already delivered
    Unchanged,
    Delivered { file_id: String, file_name: String },
    /// Listing or delivery failed; the mapping stays active
    Failed { retry_count: u32 },
    /// Retry budget exhausted; the mapping was deactivated and its timer cancelled
    Paused { retry_count: u32 },
}

/// Cancellation flag for one folder timer.
/// Cancelling stops future cycles; a cycle already running completes.
struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Single waiter: notify_one keeps a permit if the timer is mid-cycle
        self.notify.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

struct TimerHandle {
    cancel: Arc<CancelToken>,
    task: JoinHandle<()>,
}

enum CycleResult {
    Empty,
    Unchanged,
    Delivered(FileDescriptor),
}

pub(super) struct MonitorInner {
    pub(super) check_interval: Duration,
    first_check_delay: Duration,
    max_retries: u32,
    store: Arc<dyn MappingStore>,
    pub(super) storage: Arc<dyn StorageBackend>,
    pub(super) delivery: Delivery,
    pub(super) mappings: Mutex<HashMap<String, FolderMapping>>,
    timers: Mutex<HashMap<String, TimerHandle>>,
    /// Per-folder exclusion so two cycles of one folder never overlap
    poll_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Makes snapshot-then-write of the store one exclusive section
    persist_lock: tokio::sync::Mutex<()>,
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the mapping set and one polling task per active folder.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FolderMonitor {
    pub(super) inner: Arc<MonitorInner>,
}

impl FolderMonitor {
    pub fn new(
        settings: &AutoFetchSettings,
        store: Arc<dyn MappingStore>,
        storage: Arc<dyn StorageBackend>,
        delivery: Delivery,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                check_interval: settings.check_interval(),
                first_check_delay: settings.first_check_delay(),
                max_retries: settings.max_retries(),
                store,
                storage,
                delivery,
                mappings: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                poll_gates: Mutex::new(HashMap::new()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Load the persisted mapping set, replacing the in-memory one.
    ///
    /// Active records whose retry count already reached the limit (e.g. after
    /// `max_retries` was lowered) are paused. An empty store is written back so
    /// the file exists afterwards.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let mut loaded = self.inner.store.load_all().await?;
        let count = loaded.len();
        let mut paused = 0;
        for mapping in loaded.values_mut() {
            if mapping.is_active && mapping.retry_count >= self.inner.max_retries {
                mapping.is_active = false;
                paused += 1;
                warn!(
                    folder_id = %mapping.folder_id,
                    retry_count = mapping.retry_count,
                    "retry limit already reached, pausing restored mapping"
                );
            }
        }
        *lock(&self.inner.mappings) = loaded;
        if count == 0 || paused > 0 {
            self.inner.persist().await?;
        }
        info!(count, paused, "loaded auto-fetch mappings");
        Ok(count)
    }

    /// (Re)start the periodic poll for one folder. Any existing timer for the
    /// folder is cancelled first. Returns false if the mapping is missing or inactive.
    pub fn start_monitoring(&self, folder_id: &str) -> bool {
        self.inner.start_timer(folder_id)
    }

    /// Cancel the folder's timer if it has one
    pub fn stop_monitoring(&self, folder_id: &str) {
        self.inner.stop_timer(folder_id);
    }

    /// Start timers for every active mapping. Does nothing while storage is unavailable.
    pub fn start_all(&self) -> usize {
        if !self.inner.storage.is_available() {
            warn!("drive storage not configured, auto-fetch monitoring disabled");
            return 0;
        }
        let active: Vec<String> = lock(&self.inner.mappings)
            .values()
            .filter(|m| m.is_active)
            .map(|m| m.folder_id.clone())
            .collect();
        let started = active.iter().filter(|id| self.inner.start_timer(id)).count();
        info!(started, "auto-fetch monitoring started");
        started
    }

    /// Cancel every timer. Cycles already running still finish and persist.
    pub fn stop_all(&self) {
        let stopped: Vec<TimerHandle> = lock(&self.inner.timers).drain().map(|(_, h)| h).collect();
        for handle in &stopped {
            handle.cancel.cancel();
        }
        info!(stopped = stopped.len(), "auto-fetch monitoring stopped");
    }

    /// Cancel every timer and wait for in-flight cycles to finish
    pub async fn shutdown(&self) {
        let handles: Vec<TimerHandle> = lock(&self.inner.timers).drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
    }

    /// Run one poll cycle for the folder. Normally driven by the folder's timer.
    pub async fn poll_once(&self, folder_id: &str) -> PollOutcome {
        self.inner.poll_once(folder_id).await
    }

    pub fn is_monitoring(&self, folder_id: &str) -> bool {
        lock(&self.inner.timers).contains_key(folder_id)
    }

    /// Number of live folder timers
    pub fn active_monitor_count(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    pub fn check_interval(&self) -> Duration {
        self.inner.check_interval
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries
    }

    pub fn storage_available(&self) -> bool {
        self.inner.storage.is_available()
    }

    /// Snapshot of one mapping
    pub fn mapping(&self, folder_id: &str) -> Option<FolderMapping> {
        lock(&self.inner.mappings).get(folder_id).cloned()
    }
}

impl MonitorInner {
    fn start_timer(self: &Arc<Self>, folder_id: &str) -> bool {
        let active = lock(&self.mappings)
            .get(folder_id)
            .map(|m| m.is_active)
            .unwrap_or(false);
        if !active {
            return false;
        }

        let cancel = Arc::new(CancelToken::new());
        let task = tokio::spawn(run_timer(self.clone(), folder_id.to_string(), cancel.clone()));
        let previous = lock(&self.timers).insert(folder_id.to_string(), TimerHandle { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        info!(folder_id, interval_secs = self.check_interval.as_secs(), "monitoring folder");
        true
    }

    fn stop_timer(&self, folder_id: &str) {
        let removed = lock(&self.timers).remove(folder_id);
        if let Some(handle) = removed {
            handle.cancel.cancel();
            info!(folder_id, "stopped monitoring folder");
        }
    }

    pub(super) fn forget_gate(&self, folder_id: &str) {
        lock(&self.poll_gates).remove(folder_id);
    }

    pub(super) fn poll_gate(&self, folder_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.poll_gates)
            .entry(folder_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Write the full mapping set. Failures are logged; memory stays authoritative.
    pub(super) async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = lock(&self.mappings).clone();
        let result = self.store.save_all(&snapshot).await;
        if let Err(e) = &result {
            warn!(error = %e, "failed to save auto-fetch mappings");
        }
        result
    }

    async fn poll_once(&self, folder_id: &str) -> PollOutcome {
        let gate = self.poll_gate(folder_id);
        let _serial = gate.lock().await;

        // Always read the mapping fresh; never reuse state across cycles
        let mapping = lock(&self.mappings).get(folder_id).cloned();
        let Some(mapping) = mapping.filter(|m| m.is_active) else {
            return PollOutcome::Skipped;
        };

        debug!(folder_id, "checking folder for new files");
        let result = self.check_folder(&mapping).await;

        let outcome = {
            let mut mappings = lock(&self.mappings);
            let Some(current) = mappings.get_mut(folder_id) else {
                debug!(folder_id, "mapping removed during poll, result discarded");
                return PollOutcome::Skipped;
            };
            if current.added_at != mapping.added_at {
                debug!(folder_id, "mapping replaced during poll, result discarded");
                return PollOutcome::Skipped;
            }
            let toggled = current.generation != mapping.generation;
            current.last_check_time = Utc::now();

            match result {
                Ok(CycleResult::Delivered(file)) => {
                    current.last_file_id = Some(file.id.clone());
                    current.last_file_name = Some(file.name.clone());
                    current.send_first_file = false;
                    current.retry_count = 0;
                    PollOutcome::Delivered {
                        file_id: file.id,
                        file_name: file.name,
                    }
                }
                // Paused or resumed while suspended: the retry state belongs to the toggle
                _ if toggled => {
                    debug!(folder_id, "mapping toggled during poll, result discarded");
                    PollOutcome::Skipped
                }
                Ok(CycleResult::Empty) => {
                    current.retry_count = 0;
                    debug!(folder_id, "no eligible files in folder");
                    PollOutcome::Empty
                }
                Ok(CycleResult::Unchanged) => {
                    current.retry_count = 0;
                    debug!(folder_id, "no new files in folder");
                    PollOutcome::Unchanged
                }
                Err(e) => {
                    current.retry_count = current.retry_count.saturating_add(1);
                    let retry_count = current.retry_count;
                    if retry_count >= self.max_retries {
                        current.is_active = false;
                        error!(
                            folder_id,
                            retry_count,
                            error = %e,
                            "max retries reached, pausing monitoring"
                        );
                        PollOutcome::Paused { retry_count }
                    } else {
                        warn!(folder_id, retry_count, error = %e, "poll cycle failed");
                        PollOutcome::Failed { retry_count }
                    }
                }
            }
        };

        if matches!(outcome, PollOutcome::Paused { .. }) {
            self.stop_timer(folder_id);
        }
        let _ = self.persist().await;
        outcome
    }

    async fn check_folder(&self, mapping: &FolderMapping) -> Result<CycleResult, PollError> {
        let latest = self
            .storage
            .latest_eligible_file(&mapping.folder_id)
            .await
            .map_err(PollError::Listing)?;

        let Some(file) = latest else {
            return Ok(CycleResult::Empty);
        };
        if !mapping.is_new_file(&file) {
            return Ok(CycleResult::Unchanged);
        }

        if mapping.last_file_id.is_none() {
            info!(folder_id = %mapping.folder_id, file = %file.name, "sending latest file on first setup");
        } else {
            info!(folder_id = %mapping.folder_id, file = %file.name, "new file detected");
        }

        if self.delivery.deliver(mapping, &file).await {
            Ok(CycleResult::Delivered(file))
        } else {
            Err(PollError::Delivery(file.name))
        }
    }
}

/// Per-folder timer: one early poll shortly after start, then one per interval
async fn run_timer(inner: Arc<MonitorInner>, folder_id: String, cancel: Arc<CancelToken>) {
    let start = Instant::now();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(inner.first_check_delay) => {}
    }

    let mut ticker = tokio::time::interval_at(start + inner.check_interval, inner.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if cancel.is_cancelled() {
            return;
        }
        inner.poll_once(&folder_id).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
    }
}
