use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "shopsans_cache_hit_total",
            Unit::Count,
            "Responses served from the shared cache store."
        );
        describe_counter!(
            "shopsans_cache_miss_total",
            Unit::Count,
            "Responses computed because the shared cache had no usable entry."
        );
        describe_counter!(
            "shopsans_cache_not_modified_total",
            Unit::Count,
            "Cache hits answered with 304 Not Modified."
        );
        describe_counter!(
            "shopsans_cache_bypass_total",
            Unit::Count,
            "Requests that asked to skip the response cache."
        );
        describe_counter!(
            "shopsans_store_degraded_total",
            Unit::Count,
            "Transitions of the shared cache store into the degraded state."
        );
        describe_counter!(
            "shopsans_rate_limit_rejected_total",
            Unit::Count,
            "Requests rejected with 429, labelled by scope."
        );
        describe_counter!(
            "shopsans_rate_limit_fallback_total",
            Unit::Count,
            "Rate-limit checks served by the in-process window map, labelled by scope."
        );
        describe_counter!(
            "shopsans_search_total",
            Unit::Count,
            "Search requests, labelled by resource type and the stage that answered."
        );
    });
}
