use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::Config;

const SERVICE_NAME: &str = "route_builder";

/// Keeps the exporters alive. Flushes them on drop.
pub struct Telemetry {
    provider: SdkTracerProvider,
    _file_guard: WorkerGuard,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            warn!("error shutting down the tracer provider: {e}");
        }
    }
}

pub fn init(config: &Config) -> Result<Telemetry> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_timeout(Duration::from_millis(1000))
        .with_endpoint(config.otlp_endpoint.clone())
        .build()
        .context("building the OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build();

    let tracer = provider.tracer(SERVICE_NAME);

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::daily(&config.log_dir, "route_builder.log");
    let (non_blocking_appender, file_guard) = tracing_appender::non_blocking(appender);

    // A layer that logs events to rolling files.
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .pretty();

    Registry::default()
        .with(telemetry_layer)
        .with(file_log)
        .with(env_filter)
        .try_init()
        .context("installing the tracing subscriber")?;

    Ok(Telemetry {
        provider,
        _file_guard: file_guard,
    })
}
