//! Receive GitLab pipeline and job hooks and ship them to Honeycomb as trace spans.
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use envconfig::Envconfig;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use buildevents::config::Config;
use buildevents::server::{serve, Options};
use buildevents::sinks::honeycomb::{HoneycombConfig, DEFAULT_API_HOST, DEFAULT_DATASET};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Honeycomb API key. Without one, events are printed instead of sent.
    #[arg(short = 'k', long = "apikey", env = "BUILDEVENT_APIKEY", default_value = "")]
    api_key: String,

    /// Honeycomb dataset to send events to.
    #[arg(short, long, env = "BUILDEVENT_DATASET", default_value = DEFAULT_DATASET)]
    dataset: String,

    /// Honeycomb API host.
    #[arg(short = 'a', long = "apihost", env = "BUILDEVENT_APIHOST", default_value = DEFAULT_API_HOST)]
    api_host: String,

    /// Log raw and decoded hook payloads.
    #[arg(long, env = "DEBUG")]
    debug: bool,
}

async fn shutdown() {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!("failed to register SIGTERM handler: {}", err);
            return;
        }
    };

    let mut interrupt = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(interrupt) => interrupt,
        Err(err) => {
            tracing::error!("failed to register SIGINT handler: {}", err);
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down");
}

fn init_tracer(sink_url: &str, service_name: &str) -> Result<Tracer, opentelemetry::trace::TraceError> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
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
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::init_from_env().context("invalid configuration")?;

    // Instantiate tracing outputs:
    //   - stdout with a level configured by the RUST_LOG envvar (default=INFO, DEBUG with --debug)
    //   - OpenTelemetry if enabled, for levels INFO and higher
    let default_level = if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy(),
    );
    let otel_layer = config
        .otel_url
        .as_deref()
        .map(|url| init_tracer(url, &config.otel_service_name))
        .transpose()
        .context("failed to initialize opentelemetry exporter")?
        .map(OpenTelemetryLayer::new)
        .with_filter(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(log_layer)
        .with(otel_layer)
        .init();

    let options = Options {
        honeycomb: HoneycombConfig {
            api_key: cli.api_key,
            dataset: cli.dataset,
            api_host: cli.api_host,
        },
        debug: cli.debug,
        version: env!("CARGO_PKG_VERSION").to_owned(),
    };

    // Open the TCP port and start the server
    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .with_context(|| format!("could not bind {}", config.bind()))?;
    serve(config, options, listener, shutdown()).await
}
