//! Backend traits describing the remote side of the chat and feed.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::chat::ChatMessage;
use crate::application::feed::FeedItem;
use crate::cache::Page;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request rejected: {message}")]
    Rejected { message: String },
}

impl BackendError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Full thread with `friend_id`, oldest first.
    async fn list_messages(&self, friend_id: &str) -> Result<Vec<ChatMessage>, BackendError>;

    /// Deliver `text` to `friend_id`, returning the stored message.
    async fn send_message(&self, friend_id: &str, text: &str) -> Result<ChatMessage, BackendError>;
}

#[async_trait]
pub trait FeedBackend: Send + Sync {
    /// Up to `limit` items of `scope` starting at offset `cursor`.
    async fn list_items(
        &self,
        scope: &str,
        cursor: u64,
        limit: u32,
    ) -> Result<Page<FeedItem, u64>, BackendError>;
}
