use std::path::Path;

use async_trait::async_trait;

use crate::error::CapabilityError;

/// Chat transport capability: the only way the core talks to chats
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a local file as a media attachment with a caption
    async fn send_media(&self, chat_id: &str, file_path: &Path, caption: &str) -> Result<(), CapabilityError>;

    /// Send a plain text message
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), CapabilityError>;

    /// Whether this transport can address `chat_id` at all
    fn validate_chat_id(&self, _chat_id: &str) -> bool {
        true
    }
}
