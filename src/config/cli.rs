use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the query-sync demo binary.
#[derive(Debug, Parser)]
#[command(
    name = "query-sync",
    version,
    about = "Drive the query cache against in-memory backends"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "QUERY_SYNC_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: LoggingOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Send a chat message with an optimistic update.
    Chat(ChatArgs),
    /// Page through a feed until it is exhausted or the page limit is hit.
    Feed(FeedArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ChatArgs {
    /// Friend whose thread receives the message.
    #[arg(long, default_value = "1")]
    pub friend: String,

    /// Message text.
    #[arg(long, default_value = "Hola")]
    pub text: String,

    /// Simulated backend latency for sends, in milliseconds.
    #[arg(long = "latency-ms", default_value_t = 600)]
    pub latency_ms: u64,

    /// Make the backend reject the send so the rollback path runs.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub reject: bool,
}

#[derive(Debug, Args, Clone)]
pub struct FeedArgs {
    /// Feed scope, for example a category slug.
    #[arg(long, default_value = "all")]
    pub scope: String,

    /// Number of items the in-memory backend holds.
    #[arg(long, default_value_t = 45)]
    pub items: u32,

    /// Stop after this many pages even if more are available.
    #[arg(long = "max-pages", default_value_t = 10)]
    pub max_pages: u32,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the log level filter (e.g. info, debug).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
