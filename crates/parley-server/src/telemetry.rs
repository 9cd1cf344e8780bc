//! OpenTelemetry instrumentation for Parley Server.
//!
//! Structured JSON logs always; OTLP traces and metrics when a collector
//! endpoint is configured. The routing core records its metrics through
//! the global meter provider installed here.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    trace::SdkTracerProvider,
    Resource,
};
use tracing::Subscriber;
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The global tracer provider, stored for shutdown.
static TRACER_PROVIDER: std::sync::OnceLock<SdkTracerProvider> = std::sync::OnceLock::new();

/// The global meter provider, stored for shutdown.
static METER_PROVIDER: std::sync::OnceLock<SdkMeterProvider> = std::sync::OnceLock::new();

const DEFAULT_FILTER: &str = "info,parley_server=debug,parley_core=debug";

/// Build the OpenTelemetry resource with service information.
fn build_resource() -> Resource {
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "parley-server".to_string());
    let service_version = std::env::var("OTEL_SERVICE_VERSION")
        .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", service_name),
            KeyValue::new("service.version", service_version),
        ])
        .build()
}

/// Resolve the log filter directive: `RUST_LOG`, then `PARLEY_LOG_LEVEL`,
/// then the default.
///
/// `PARLEY_LOG_LEVEL` accepts either a bare level (applied to both crates)
/// or a full filter directive.
fn log_filter_directive(rust_log: Option<String>, level: Option<String>) -> String {
    if let Some(filter) = rust_log {
        return filter;
    }

    if let Some(level_or_filter) = level {
        let level_or_filter = level_or_filter.trim();
        if !level_or_filter.is_empty() {
            return if level_or_filter.contains('=') || level_or_filter.contains(',') {
                level_or_filter.to_string()
            } else {
                format!(
                    "{level},parley_server={level},parley_core={level}",
                    level = level_or_filter
                )
            };
        }
    }

    DEFAULT_FILTER.to_string()
}

fn build_log_filter() -> EnvFilter {
    let directive = log_filter_directive(
        std::env::var("RUST_LOG").ok(),
        std::env::var("PARLEY_LOG_LEVEL").ok(),
    );
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Collector endpoint, if one is configured.
pub fn otlp_endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|endpoint| !endpoint.trim().is_empty())
}

/// JSON log lines with the current span and its parents attached.
fn json_layer<S>() -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
}

fn build_tracer_provider(endpoint: &str, resource: Resource) -> Result<SdkTracerProvider, BoxError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn build_meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider, BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(exporter).build())
        .with_resource(resource)
        .build())
}

/// Initialize JSON logging plus OTLP export of spans and metrics.
///
/// Session and routing metrics from `parley_core::metrics` flow through
/// the global meter provider installed here.
///
/// Environment variables:
/// - `OTEL_SERVICE_NAME`: Service name (default: parley-server)
/// - `OTEL_SERVICE_VERSION`: Service version (default: crate version)
pub fn init(endpoint: &str) -> Result<(), BoxError> {
    let resource = build_resource();

    let tracer_provider = build_tracer_provider(endpoint, resource.clone())?;
    let tracer = tracer_provider.tracer("parley-server");
    let _ = TRACER_PROVIDER.set(tracer_provider);

    let meter_provider = build_meter_provider(endpoint, resource)?;
    let _ = METER_PROVIDER.set(meter_provider.clone());
    opentelemetry::global::set_meter_provider(meter_provider);

    tracing_subscriber::registry()
        .with(build_log_filter())
        .with(json_layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    tracing::info!(endpoint = %endpoint, "Telemetry initialized with OTLP export");
    Ok(())
}

/// Initialize JSON logging without OTLP export.
pub fn init_local() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(build_log_filter())
        .with(json_layer())
        .try_init()?;

    tracing::info!("Telemetry initialized with JSON logging only");
    Ok(())
}

/// Shutdown telemetry, flushing any pending spans and metrics.
pub fn shutdown() {
    tracing::info!("Shutting down telemetry...");

    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::error!(error = %e, "Error shutting down tracer provider");
        }
    }

    if let Some(provider) = METER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::error!(error = %e, "Error shutting down meter provider");
        }
    }

    tracing::info!("Telemetry shutdown complete");
}
