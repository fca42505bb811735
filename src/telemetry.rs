//! OpenTelemetry tracing
//!
//! Exports spans over OTLP/gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! The exporter reads the endpoint from the environment itself.

use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::trace::{self, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::error::{Error, Result};

pub const SERVICE_NAME: &str = "glbc";

/// Environment variable that switches OTLP export on
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

pub fn otlp_enabled() -> bool {
    std::env::var(OTLP_ENDPOINT_ENV).is_ok()
}

/// Build a tracing layer that batches spans to the OTLP collector.
pub fn init_telemetry<S>(_subscriber: &S) -> Result<OpenTelemetryLayer<S, Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("Failed to install OTLP tracer: {}", e)))?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush buffered spans.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
