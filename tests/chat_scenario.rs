use std::sync::Arc;
use std::time::Duration;

use query_sync::application::chat::{ChatError, ChatService, Sender};
use query_sync::cache::{EntryStatus, OptimisticRecord, QueryOptions};
use query_sync::infra::memory::MemoryChatBackend;
use tokio::time::Instant;

const FRIEND: &str = "1";
const SEND_LATENCY: Duration = Duration::from_millis(600);

async fn seeded_chat(messages: usize) -> Arc<ChatService<MemoryChatBackend>> {
    let backend = Arc::new(MemoryChatBackend::new().with_send_latency(SEND_LATENCY));
    for index in 0..messages {
        backend.receive(FRIEND, &format!("incoming #{index}"));
    }

    let chat = Arc::new(ChatService::new(backend, QueryOptions::default()));
    let thread = chat.messages(FRIEND).await.expect("initial thread");
    assert_eq!(thread.len(), messages);
    chat
}

#[tokio::test(start_paused = true)]
async fn sent_message_shows_immediately_and_is_replaced_by_server_copy() {
    let chat = seeded_chat(3).await;
    let started = Instant::now();

    let send = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.send(FRIEND, "Hola").await })
    };

    while chat.cached(FRIEND).data.as_ref().map_or(0, Vec::len) != 4 {
        tokio::task::yield_now().await;
    }
    assert!(started.elapsed() < SEND_LATENCY);

    let pending = chat.cached(FRIEND).data.expect("thread cached");
    let placeholder = pending.last().expect("optimistic message");
    assert!(placeholder.is_optimistic());
    assert_eq!(placeholder.text, "Hola");
    assert_eq!(placeholder.sender, Sender::Me);

    let delivered = send.await.expect("send task").expect("delivered");
    assert!(started.elapsed() >= SEND_LATENCY);
    assert!(!delivered.is_optimistic());

    let entry = chat.cached(FRIEND);
    assert_eq!(entry.status, EntryStatus::Success);
    let thread = entry.data.expect("thread cached");
    assert_eq!(thread.len(), 4);
    assert!(thread.iter().all(|message| !message.is_optimistic()));
    assert_eq!(thread.last().map(|message| message.id.as_str()), Some(delivered.id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn rejected_message_disappears_and_thread_is_restored() {
    let backend = Arc::new(MemoryChatBackend::new().with_send_latency(SEND_LATENCY));
    backend.receive(FRIEND, "hi");
    backend.receive("2", "other thread");
    backend.set_reject(true);
    let chat = ChatService::new(Arc::clone(&backend), QueryOptions::default());
    let before = chat.messages(FRIEND).await.expect("initial thread");
    let other = chat.messages("2").await.expect("other thread");

    let error = chat
        .send(FRIEND, "blocked text")
        .await
        .expect_err("rejected");
    assert!(matches!(error, ChatError::NotDelivered(_)));

    let entry = chat.cached(FRIEND);
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(entry.data, Some(before));
    assert_eq!(backend.message_count(FRIEND), 1);
    assert_eq!(chat.cached("2").data, Some(other));
}

#[tokio::test(start_paused = true)]
async fn thread_shows_placeholder_then_rolls_back() {
    let backend = Arc::new(MemoryChatBackend::new().with_send_latency(SEND_LATENCY));
    backend.receive(FRIEND, "are you there?");
    backend.set_reject(true);
    let chat = Arc::new(ChatService::new(Arc::clone(&backend), QueryOptions::default()));
    let before = chat.messages(FRIEND).await.expect("initial thread");

    let send = {
        let chat = Arc::clone(&chat);
        tokio::spawn(async move { chat.send(FRIEND, "hello?").await })
    };
    while chat.cached(FRIEND).data.as_ref().map_or(0, Vec::len) != before.len() + 1 {
        tokio::task::yield_now().await;
    }

    let result = send.await.expect("send task");
    assert!(matches!(result, Err(ChatError::NotDelivered(_))));
    assert_eq!(chat.cached(FRIEND).data, Some(before));
}
