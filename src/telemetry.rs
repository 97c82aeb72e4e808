//! Tracing, metrics and log export.
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, TraceError, Tracer};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{LogError, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const SAMPLE_PERIOD: Duration = Duration::from_secs(10);

fn resource() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .build()
}

/// OTLP span exporter. Endpoint comes from `OTEL_EXPORTER_OTLP_ENDPOINT`.
pub fn setup_tracer() -> Result<SdkTracerProvider, TraceError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic().build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Bridge sending `tracing` events to an OTLP log collector.
pub fn setup_logging(endpoint: &str) -> Result<OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>, LogError> {
    let exporter = LogExporter::builder().with_tonic().with_endpoint(endpoint).build()?;
    let provider = SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();
    Ok(OpenTelemetryTracingBridge::new(&provider))
}

/// Installs the Prometheus recorder and starts sampling the process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_owned()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    describe_metrics();
    spawn_process_sampler();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_gauge!("process_cpu_usage", Unit::Percent, "CPU usage of the process.");
    metrics::describe_gauge!("process_memory_used_bytes", Unit::Bytes, "Resident memory of the process.");
    metrics::describe_counter!("http_requests_total", Unit::Count, "HTTP requests served.");
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Time spent answering an HTTP request."
    );

    metrics::describe_counter!(
        "ledger_transactions_total",
        Unit::Count,
        "Ledger entries written, by type and outcome."
    );
    metrics::describe_counter!("ad_views_credited_total", Unit::Count, "Ad views credited to a balance.");
    metrics::describe_counter!(
        "withdrawals_total",
        Unit::Count,
        "Withdrawals requested and settled, by resulting status."
    );
    metrics::describe_counter!(
        "task_completions_total",
        Unit::Count,
        "Task completions submitted and reviewed, by resulting status."
    );
}

fn spawn_process_sampler() {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let refresh = ProcessRefreshKind::nothing().with_memory().with_cpu();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAMPLE_PERIOD);
        loop {
            interval.tick().await;
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
            if let Some(process) = system.process(pid) {
                gauge!("process_memory_used_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(f64::from(process.cpu_usage()));
            }
        }
    });
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    }
}

/// Records a span, a counter and a latency histogram for every request.
/// Paths are labelled by route template, never by raw URI, so user ids
/// stay out of metric labels.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let mut span = global::tracer("adearn-http").start("http-request");
    let start = Instant::now();

    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();
    let version = http_version(req.version());

    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();

    span.set_attributes([
        KeyValue::new("http.version", version),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.method", method.clone()),
        KeyValue::new("http.status_code", status.clone()),
    ]);
    span.end();

    let labels = [("method", method), ("path", route), ("status", status)];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

    response
}
