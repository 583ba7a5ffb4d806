//! Traces and logs go to an OTLP collector, metrics to Prometheus.
use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio::time::sleep;

use std::time::{Duration, Instant};

type ExporterError = Box<dyn std::error::Error + Send + Sync>;

fn resource() -> Resource {
    Resource::builder().with_service_name("tasklane").build()
}

/// Create a span exporter sending batches to `endpoint`.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, ExporterError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Install the Prometheus recorder and start sampling process usage.
///
/// Must be called from within a Tokio runtime.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const LATENCY_BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_owned()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    describe_metrics();
    tokio::spawn(sample_process(PROCESS_SAMPLE_PERIOD));

    Ok(handle)
}

const PROCESS_SAMPLE_PERIOD: Duration = Duration::from_secs(10);

fn describe_metrics() {
    metrics::describe_gauge!("process_cpu_usage", Unit::Percent, "Process CPU usage.");
    metrics::describe_gauge!(
        "process_memory_used_bytes",
        Unit::Bytes,
        "Resident memory of the process."
    );
    metrics::describe_counter!(
        "session_logins_total",
        Unit::Count,
        "Refresh sessions opened by a successful login."
    );
    metrics::describe_counter!(
        "session_refreshes_total",
        Unit::Count,
        "Refresh attempts, labelled by outcome."
    );
    metrics::describe_counter!(
        "session_logouts_total",
        Unit::Count,
        "Refresh sessions closed by a logout."
    );
}

/// Publish CPU and memory gauges of the current process every `period`.
async fn sample_process(period: Duration) {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let refresh = ProcessRefreshKind::nothing().with_memory().with_cpu();

    loop {
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);

        match system.process(pid) {
            Some(process) => {
                gauge!("process_memory_used_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(f64::from(process.cpu_usage()));
            },
            None => tracing::debug!(%pid, "process not found while sampling"),
        }

        sleep(period).await;
    }
}

/// Bridge `tracing` events to an OTLP log exporter.
pub fn setup_logging(
    endpoint: &str,
) -> Result<
    (
        SdkLoggerProvider,
        OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>,
    ),
    ExporterError,
> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();
    let bridge = OpenTelemetryTracingBridge::new(&provider);

    Ok((provider, bridge))
}

/// Record a span, a counter and a latency histogram for every request.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let tracer = global::tracer("tracing-http");
    let mut otel_span = tracer.start("http-request");

    let start = Instant::now();
    // Matched templates keep label cardinality bounded (`/todos/{id}`).
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();
    let version = match req.version() {
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    };

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    otel_span.set_attribute(KeyValue::new("version", version));
    otel_span.set_attribute(KeyValue::new("path", path.clone()));
    otel_span.set_attribute(KeyValue::new("method", method.clone()));
    otel_span.set_attribute(KeyValue::new("status", status.clone()));
    otel_span.end();

    let labels = [("method", method), ("path", path), ("status", status)];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
