//! Chat threads with optimistic sends.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::application::backends::ChatBackend;
use crate::cache::{
    CacheEntry, CacheError, CacheEvent, Fetcher, OptimisticRecord, QueryClient, QueryKey,
    QueryOptions, Subscription, append_optimistic, fetcher, temp_id,
};
use crate::query_key;

const THREAD_SCOPE: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Me,
    Friend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub sent_at: OffsetDateTime,
}

impl ChatMessage {
    /// Local placeholder shown until the send is confirmed or rolled back.
    pub fn optimistic(text: impl Into<String>) -> Self {
        Self {
            id: temp_id(),
            sender: Sender::Me,
            text: text.into(),
            sent_at: OffsetDateTime::now_utc(),
        }
    }
}

impl OptimisticRecord for ChatMessage {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("message was not delivered")]
    NotDelivered(#[source] CacheError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Message threads keyed by friend, cached as whole lists.
pub struct ChatService<B> {
    backend: Arc<B>,
    client: QueryClient<Vec<ChatMessage>>,
}

impl<B> ChatService<B>
where
    B: ChatBackend + 'static,
{
    pub fn new(backend: Arc<B>, defaults: QueryOptions) -> Self {
        Self {
            backend,
            client: QueryClient::new().with_defaults(defaults),
        }
    }

    pub fn client(&self) -> &QueryClient<Vec<ChatMessage>> {
        &self.client
    }

    pub fn thread_key(friend_id: &str) -> QueryKey {
        query_key![THREAD_SCOPE, friend_id]
    }

    /// The thread with `friend_id`, fetched unless the cached copy is fresh.
    pub async fn messages(&self, friend_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let key = Self::thread_key(friend_id);
        let messages = self
            .client
            .ensure_fresh(&key, self.thread_fetcher(friend_id))
            .await?;
        Ok(messages)
    }

    /// Current cache entry for the thread, without fetching.
    pub fn cached(&self, friend_id: &str) -> CacheEntry<Vec<ChatMessage>> {
        self.client.read(&Self::thread_key(friend_id))
    }

    pub fn subscribe<F>(&self, friend_id: &str, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent<Vec<ChatMessage>>) + Send + Sync + 'static,
    {
        self.client.subscribe(Self::thread_key(friend_id), callback)
    }

    /// Send `text` to `friend_id`.
    ///
    /// The message appears in the cached thread immediately with a temporary
    /// id. Once the backend confirms it the thread is refetched; if the
    /// backend rejects it the thread is restored and
    /// [`ChatError::NotDelivered`] is returned.
    #[instrument(skip_all, fields(friend_id = %friend_id))]
    pub async fn send(&self, friend_id: &str, text: &str) -> Result<ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let key = Self::thread_key(friend_id);
        self.client
            .register(key.clone(), self.thread_fetcher(friend_id));

        let backend = Arc::clone(&self.backend);
        let friend = friend_id.to_string();
        let sent = self
            .client
            .mutate(
                &key,
                text.to_string(),
                move |text: String| async move { backend.send_message(&friend, &text).await },
                |current, text| append_optimistic(current, ChatMessage::optimistic(text.as_str())),
            )
            .await
            .map_err(|err| {
                if err.is_rollback() {
                    ChatError::NotDelivered(err)
                } else {
                    ChatError::Cache(err)
                }
            })?;

        debug!(message_id = %sent.id, "Chat message delivered");
        Ok(sent)
    }

    fn thread_fetcher(&self, friend_id: &str) -> Fetcher<Vec<ChatMessage>> {
        let backend = Arc::clone(&self.backend);
        let friend = friend_id.to_string();
        fetcher(move |_| {
            let backend = Arc::clone(&backend);
            let friend = friend.clone();
            async move { backend.list_messages(&friend).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::backends::BackendError;
    use crate::cache::EntryStatus;

    #[derive(Default)]
    struct StubChatBackend {
        stored: Mutex<Vec<ChatMessage>>,
        reject: AtomicBool,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for StubChatBackend {
        async fn list_messages(&self, _friend_id: &str) -> Result<Vec<ChatMessage>, BackendError> {
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn send_message(
            &self,
            _friend_id: &str,
            text: &str,
        ) -> Result<ChatMessage, BackendError> {
            let count = self.sends.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                return Err(BackendError::rejected("blocked"));
            }
            let message = ChatMessage {
                id: format!("srv-{count}"),
                sender: Sender::Me,
                text: text.to_string(),
                sent_at: OffsetDateTime::now_utc(),
            };
            self.stored.lock().unwrap().push(message.clone());
            Ok(message)
        }
    }

    fn service(backend: &Arc<StubChatBackend>) -> ChatService<StubChatBackend> {
        ChatService::new(Arc::clone(backend), QueryOptions::default())
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_touching_cache() {
        let backend = Arc::new(StubChatBackend::default());
        let chat = service(&backend);

        let error = chat.send("1", "   ").await.expect_err("empty text");
        assert!(matches!(error, ChatError::EmptyMessage));
        assert_eq!(backend.sends.load(Ordering::SeqCst), 0);
        assert!(chat.client().store().is_empty());
    }

    #[tokio::test]
    async fn send_trims_and_reconciles() {
        let backend = Arc::new(StubChatBackend::default());
        let chat = service(&backend);

        let sent = chat.send("1", "  Hola  ").await.expect("delivered");
        assert_eq!(sent.text, "Hola");
        assert!(!sent.is_optimistic());

        let thread = chat.cached("1").data.expect("thread cached");
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, "srv-0");
        assert!(thread.iter().all(|message| !message.is_optimistic()));
    }

    #[tokio::test]
    async fn rejected_send_restores_thread() {
        let backend = Arc::new(StubChatBackend::default());
        let chat = service(&backend);
        chat.send("1", "first").await.expect("delivered");

        backend.reject.store(true, Ordering::SeqCst);
        let error = chat.send("1", "second").await.expect_err("rejected");
        assert!(matches!(error, ChatError::NotDelivered(_)));

        let entry = chat.cached("1");
        assert_eq!(entry.status, EntryStatus::Error);
        let thread = entry.data.expect("thread kept");
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].text, "first");
    }

    #[test]
    fn thread_keys_are_per_friend() {
        assert_eq!(
            ChatService::<StubChatBackend>::thread_key("1"),
            query_key!["chat", "1"]
        );
        assert_ne!(
            ChatService::<StubChatBackend>::thread_key("1"),
            ChatService::<StubChatBackend>::thread_key("2")
        );
    }
}
