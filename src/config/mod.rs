//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::Path, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::QueryOptions;

mod cli;

pub use cli::{ChatArgs, CliArgs, Command, FeedArgs, LoggingOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "query-sync";
const ENV_PREFIX: &str = "QUERY_SYNC";
const MAX_RETRY: u32 = 10;
const DEFAULT_FEED_PAGE_SIZE: u32 = 20;
const MAX_FEED_PAGE_SIZE: u32 = 500;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub queries: QuerySettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Defaults applied to queries that do not pass their own options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    pub stale_after: Duration,
    pub retry: u32,
    pub enabled: bool,
}

impl QuerySettings {
    pub fn options(&self) -> QueryOptions {
        QueryOptions::default()
            .with_stale_after(self.stale_after)
            .with_retry(self.retry)
            .with_enabled(self.enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub page_size: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from the default files, an optional explicit file, and
/// `QUERY_SYNC__*` environment variables, in that order of precedence.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let raw = load_raw(config_file)?;
    Settings::from_raw(raw)
}

/// Parse settings from inline TOML, ignoring files and environment.
pub fn load_from_str(toml: &str) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let mut raw = load_raw(args.config_file.as_deref())?;
    raw.apply_logging_overrides(&args.overrides);
    let settings = Settings::from_raw(raw)?;
    Ok((args, settings))
}

fn load_raw(config_file: Option<&Path>) -> Result<RawSettings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    Ok(builder.build()?.try_deserialize()?)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    queries: RawQuerySettings,
    feed: RawFeedSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            queries,
            feed,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            queries: build_query_settings(queries)?,
            feed: build_feed_settings(feed)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_query_settings(queries: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    let defaults = QueryOptions::default();
    let retry = queries.retry.unwrap_or(defaults.retry);
    if retry > MAX_RETRY {
        return Err(LoadError::invalid(
            "queries.retry",
            format!("must be at most {MAX_RETRY}"),
        ));
    }

    Ok(QuerySettings {
        stale_after: queries
            .stale_after_ms
            .map_or(defaults.stale_after, Duration::from_millis),
        retry,
        enabled: queries.enabled.unwrap_or(defaults.enabled),
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let page_size = non_zero_u32(
        feed.page_size
            .unwrap_or(u64::from(DEFAULT_FEED_PAGE_SIZE)),
        "feed.page_size",
    )?;
    if page_size.get() > MAX_FEED_PAGE_SIZE {
        return Err(LoadError::invalid(
            "feed.page_size",
            format!("must be at most {MAX_FEED_PAGE_SIZE}"),
        ));
    }
    Ok(FeedSettings { page_size })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    stale_after_ms: Option<u64>,
    retry: Option<u32>,
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    page_size: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
