use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            metric_names::FETCH_TOTAL,
            Unit::Count,
            "Total number of fetches started."
        );
        describe_counter!(
            metric_names::FETCH_HIT,
            Unit::Count,
            "Total number of requests served from fresh cached data."
        );
        describe_counter!(
            metric_names::FETCH_DEDUP,
            Unit::Count,
            "Total number of requests that joined an in-flight fetch."
        );
        describe_counter!(
            metric_names::FETCH_DISCARDED,
            Unit::Count,
            "Total number of fetch responses dropped because a newer operation superseded them."
        );
        describe_histogram!(
            metric_names::FETCH_MS,
            Unit::Milliseconds,
            "Fetch latency in milliseconds, including retries."
        );
        describe_counter!(
            metric_names::PAGE_FETCH_TOTAL,
            Unit::Count,
            "Total number of page fetches started."
        );
        describe_counter!(
            metric_names::MUTATION_RECONCILED,
            Unit::Count,
            "Total number of mutations confirmed by the remote operation."
        );
        describe_counter!(
            metric_names::MUTATION_ROLLBACK,
            Unit::Count,
            "Total number of mutations rolled back after a remote failure."
        );
    });
}
