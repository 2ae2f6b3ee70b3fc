use std::io;

use thiserror::Error;

/// Failures reported by the durable mapping store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access mapping file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid mapping file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures raised by an external capability (drive storage or chat transport)
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("storage backend is not configured")]
    NotConfigured,
    #[error("invalid folder id: {0}")]
    InvalidFolder(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Rejections returned by the mapping lifecycle operations
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("folder {0} is already being monitored")]
    DuplicateFolder(String),
    #[error("cannot access folder {0}")]
    FolderInaccessible(String),
    #[error("no auto-fetch mapping found for {0}")]
    NotFound(String),
    #[error("drive storage is not configured")]
    StorageUnavailable,
    #[error("could not fetch the latest file from folder {0}")]
    FetchFailed(String),
}

impl MappingError {
    /// Operator-facing hint for fixing the rejected operation
    pub fn remediation(&self) -> &'static str {
        match self {
            MappingError::DuplicateFolder(_) => {
                "Use showfolders to see the existing monitor, or stopfolder to replace it."
            }
            MappingError::FolderInaccessible(_) => {
                "Check that the folder id is correct and that the folder is shared with the bot account with read permission."
            }
            MappingError::NotFound(_) => "Use showfolders to list the configured monitors.",
            MappingError::StorageUnavailable => "Set drive.root in settings.json and restart the bot.",
            MappingError::FetchFailed(_) => {
                "Check that the folder is still shared with the bot account and that the chat can receive files, then try again."
            }
        }
    }
}

/// Failure of a single poll cycle. Always contained inside the folder monitor.
#[derive(Debug, Error)]
pub(crate) enum PollError {
    #[error("listing failed: {0}")]
    Listing(#[source] CapabilityError),
    #[error("delivery of {0} failed")]
    Delivery(String),
}
