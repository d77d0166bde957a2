//! In-memory backends with simulated latency, for the demo binary and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::backends::{BackendError, ChatBackend, FeedBackend};
use crate::application::chat::{ChatMessage, Sender};
use crate::application::feed::FeedItem;
use crate::cache::Page;

/// Chat threads held in process memory.
///
/// Sends wait `send_latency` before answering; while rejection is switched
/// on every send fails without storing anything.
#[derive(Debug, Default)]
pub struct MemoryChatBackend {
    threads: Mutex<HashMap<String, Vec<ChatMessage>>>,
    send_latency: Duration,
    reject: AtomicBool,
    next_id: AtomicU64,
    list_calls: AtomicUsize,
}

impl MemoryChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = latency;
        self
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Append a message from the friend to the thread.
    pub fn receive(&self, friend_id: &str, text: &str) -> ChatMessage {
        let message = self.store_message(friend_id, Sender::Friend, text);
        debug!(friend_id, message_id = %message.id, "Seeded incoming message");
        message
    }

    pub fn message_count(&self, friend_id: &str) -> usize {
        self.threads_lock()
            .get(friend_id)
            .map_or(0, Vec::len)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn store_message(&self, friend_id: &str, sender: Sender, text: &str) -> ChatMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = ChatMessage {
            id: format!("msg-{id}"),
            sender,
            text: text.to_string(),
            sent_at: OffsetDateTime::now_utc(),
        };
        self.threads_lock()
            .entry(friend_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    fn threads_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChatBackend for MemoryChatBackend {
    async fn list_messages(&self, friend_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .threads_lock()
            .get(friend_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, friend_id: &str, text: &str) -> Result<ChatMessage, BackendError> {
        if !self.send_latency.is_zero() {
            tokio::time::sleep(self.send_latency).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(BackendError::rejected("message blocked by recipient"));
        }
        Ok(self.store_message(friend_id, Sender::Me, text))
    }
}

/// A fixed list of feed items served by offset.
#[derive(Debug)]
pub struct MemoryFeedBackend {
    items: Vec<FeedItem>,
    requests: AtomicUsize,
}

impl MemoryFeedBackend {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items,
            requests: AtomicUsize::new(0),
        }
    }

    /// `count` generated items by a rotating set of authors.
    pub fn generated(count: u32) -> Self {
        const AUTHORS: [&str; 3] = ["ana", "bruno", "carla"];
        let items = (0..count)
            .map(|index| FeedItem {
                id: format!("item-{index}"),
                title: format!("Post #{index}"),
                author: AUTHORS[index as usize % AUTHORS.len()].to_string(),
            })
            .collect();
        Self::new(items)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedBackend for MemoryFeedBackend {
    async fn list_items(
        &self,
        _scope: &str,
        cursor: u64,
        limit: u32,
    ) -> Result<Page<FeedItem, u64>, BackendError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let total = self.items.len();
        let start = usize::try_from(cursor)
            .map_err(|_| BackendError::rejected(format!("cursor {cursor} out of range")))?
            .min(total);
        let end = start.saturating_add(limit as usize).min(total);
        let items = self.items[start..end].to_vec();

        if end < total {
            Ok(Page::new(items, Some(end as u64)))
        } else {
            Ok(Page::last(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_backend_stores_and_rejects() {
        let backend = MemoryChatBackend::new();
        backend.receive("1", "hi");

        let sent = backend.send_message("1", "hello").await.unwrap();
        assert_eq!(sent.sender, Sender::Me);
        assert_eq!(backend.message_count("1"), 2);

        backend.set_reject(true);
        assert!(matches!(
            backend.send_message("1", "again").await,
            Err(BackendError::Rejected { .. })
        ));
        assert_eq!(backend.message_count("1"), 2);
        assert_eq!(backend.list_messages("2").await.unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_send_waits_for_latency() {
        let backend = MemoryChatBackend::new().with_send_latency(Duration::from_millis(600));
        let started = tokio::time::Instant::now();

        backend.send_message("1", "hola").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn feed_backend_pages_by_offset() {
        let backend = MemoryFeedBackend::generated(5);

        let first = backend.list_items("all", 0, 3).await.unwrap();
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.next_cursor, Some(3));

        let last = backend.list_items("all", 3, 3).await.unwrap();
        assert_eq!(last.items.len(), 2);
        assert_eq!(last.next_cursor, None);

        let past_end = backend.list_items("all", 10, 3).await.unwrap();
        assert!(past_end.items.is_empty());
        assert_eq!(backend.requests(), 3);
    }
}
