use std::time::Duration;

use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;
use crate::error::ObservabilityError;

fn init_tracer(
    sink_url: &str,
    sampling_rate: f64,
    service_name: &str,
    export_timeout_secs: u64,
) -> Result<Tracer, ObservabilityError> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    sampling_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    Value::from(service_name.to_string()),
                )])),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(sink_url)
                .with_timeout(Duration::from_secs(export_timeout_secs)),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

/// Installs the global subscriber:
///   - stdout, filtered by RUST_LOG: JSON in release mode, pretty otherwise
///   - OpenTelemetry export for INFO and higher when observability is active
///
/// Must be called from within a tokio runtime when observability is active.
pub fn init_tracing(config: &Config, service_name: &str) -> Result<(), ObservabilityError> {
    let log_layer = {
        let base_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true);

        if config.release_mode {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    let otel_layer = if config.observe_is_active {
        Some(
            OpenTelemetryLayer::new(init_tracer(
                &config.observe_otlp_endpoint,
                config.observe_sampling_rate,
                service_name,
                config.observe_export_timeout_secs,
            )?)
            .with_filter(LevelFilter::INFO),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(log_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flushes spans still queued for export. A no-op when nothing was installed.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
