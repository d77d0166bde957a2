use std::{process, sync::Arc, time::Duration};

use query_sync::{
    application::{
        chat::{ChatError, ChatMessage, ChatService},
        feed::{FeedError, FeedService},
    },
    cache::{CacheEntry, OptimisticRecord},
    config::{self, ChatArgs, Command, FeedArgs, Settings},
    infra::{
        error::InfraError,
        memory::{MemoryChatBackend, MemoryFeedBackend},
        telemetry,
    },
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(InfraError::from)?;
    telemetry::init(&settings.logging)?;

    let command = cli_args.command.unwrap_or(Command::Chat(ChatArgs {
        friend: "1".to_string(),
        text: "Hola".to_string(),
        latency_ms: 600,
        reject: false,
    }));

    match command {
        Command::Chat(args) => run_chat(&settings, args).await,
        Command::Feed(args) => run_feed(&settings, args).await,
    }
}

async fn run_chat(settings: &Settings, args: ChatArgs) -> Result<(), AppError> {
    let backend = Arc::new(
        MemoryChatBackend::new().with_send_latency(Duration::from_millis(args.latency_ms)),
    );
    backend.receive(&args.friend, "Hey! Did you see the new course?");
    backend.set_reject(args.reject);

    let chat = ChatService::new(Arc::clone(&backend), settings.queries.options());
    let before = chat.messages(&args.friend).await?;
    info!(friend = %args.friend, messages = before.len(), "Loaded chat thread");

    let _subscription = chat.subscribe(&args.friend, |event| {
        let (messages, optimistic) = thread_counts(event.entry.as_ref());
        info!(
            event_kind = ?event.kind,
            event_epoch = event.epoch,
            messages,
            optimistic,
            "Chat thread changed"
        );
    });

    match chat.send(&args.friend, &args.text).await {
        Ok(message) => info!(message_id = %message.id, "Message delivered"),
        Err(ChatError::NotDelivered(cause)) => {
            info!(error = %cause, "Message rejected; thread restored")
        }
        Err(other) => return Err(other.into()),
    }

    let entry = chat.cached(&args.friend);
    info!(
        status = entry.status.as_str(),
        messages = entry.data.as_ref().map_or(0, Vec::len),
        "Final chat thread"
    );
    Ok(())
}

/// Total and optimistic message counts of a thread entry.
fn thread_counts(entry: Option<&CacheEntry<Vec<ChatMessage>>>) -> (usize, usize) {
    entry
        .and_then(|entry| entry.data.as_ref())
        .map_or((0, 0), |thread| {
            let optimistic = thread.iter().filter(|message| message.is_optimistic()).count();
            (thread.len(), optimistic)
        })
}

async fn run_feed(settings: &Settings, args: FeedArgs) -> Result<(), AppError> {
    let backend = Arc::new(MemoryFeedBackend::generated(args.items));
    let feed = FeedService::new(
        Arc::clone(&backend),
        &settings.feed,
        settings.queries.options(),
    );

    let mut pages = 0;
    while pages < args.max_pages {
        let has_more = feed.load_more(&args.scope).await?;
        pages += 1;
        info!(
            scope = %args.scope,
            page = pages,
            loaded = feed.items(&args.scope).len(),
            has_more,
            "Feed page loaded"
        );
        if !has_more {
            break;
        }
    }

    info!(
        scope = %args.scope,
        items = feed.items(&args.scope).len(),
        requests = backend.requests(),
        "Feed finished"
    );
    Ok(())
}
