use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::hook::Dispatcher;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::shaper::EventShaper;
use crate::sinks::{EventSink, HoneycombConfig, HoneycombSink, PrintSink};

/// Runtime switches that come from the command line rather than the
/// environment-only `Config`.
#[derive(Debug, Clone)]
pub struct Options {
    pub honeycomb: HoneycombConfig,
    pub debug: bool,
    pub version: String,
}

pub async fn serve<F>(
    config: Config,
    options: Options,
    listener: TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut flushed = None;
    let sink: Arc<dyn EventSink + Send + Sync> = if options.honeycomb.api_key.is_empty() {
        tracing::warn!("no honeycomb api key configured, printing events instead");
        Arc::new(PrintSink {})
    } else {
        let (sink, handle) = HoneycombSink::new(
            options.honeycomb,
            &options.version,
            config.request_timeout.0,
            config.max_queued_events,
            config.max_concurrent_sends,
        )
        .context("failed to build honeycomb client")?;
        flushed = Some(handle);
        Arc::new(sink)
    };

    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder().context("failed to install prometheus recorder")?)
    } else {
        None
    };

    let dispatcher = Dispatcher::new(
        config.hook_secret,
        EventShaper::new(options.version),
        sink,
        options.debug,
    );
    let app = router::router(dispatcher, metrics);

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    if let Some(handle) = flushed {
        tracing::info!("flushing queued events");
        handle.await.context("honeycomb transmission task failed")?;
    }

    Ok(())
}
