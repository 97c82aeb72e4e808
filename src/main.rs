use std::net::{Ipv4Addr, SocketAddr};

use adearn::telemetry;
use axum::routing::get;
use opentelemetry::global;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() {
    // Ship logs and spans over OTLP only when a collector is configured.
    let endpoint = std::env::var(OTLP_ENDPOINT).ok();
    let (otlp_logs, otlp_error) = match endpoint.as_deref().map(telemetry::setup_logging) {
        Some(Ok(layer)) => (Some(layer), None),
        Some(Err(err)) => (None, Some(err.to_string())),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("adearn=info,tower_http=info")))
        .with(fmt::layer())
        .with(otlp_logs)
        .init();

    if let Some(err) = otlp_error {
        tracing::error!(error = %err, "cannot export logs over OTLP");
    }
    if endpoint.is_some() {
        match telemetry::setup_tracer() {
            Ok(provider) => {
                global::set_tracer_provider(provider);
            },
            Err(err) => tracing::error!(error = %err, "cannot export traces over OTLP"),
        }
    }

    let state = match adearn::initialize_state().await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start adearn");
            std::process::exit(1);
        },
    };
    let port = state.config.port;

    let mut app = adearn::app(state);
    match telemetry::setup_metrics_recorder() {
        Ok(handle) => {
            app = app.route("/metrics", get(move || std::future::ready(handle.render())));
        },
        Err(err) => tracing::warn!(error = %err, "prometheus recorder unavailable, `/metrics` disabled"),
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "cannot bind listener");
            std::process::exit(1);
        },
    };

    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "server listening");
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped unexpectedly");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
