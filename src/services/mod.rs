pub mod storage;
pub mod telegram;
pub mod transport;

pub use storage::{LocalDriveStorage, StorageBackend};
pub use transport::ChatTransport;
