use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{any, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::hook::{self, Dispatcher};
use crate::prometheus::track_metrics;

pub const BANNER: &str = "# GitLab Honeycomb Buildevents Webhooks Sink\n\n\
GET /healthz: healthcheck\n\n\
POST /api/message: receive array of notifications\n";

#[derive(Clone)]
pub struct State {
    pub dispatcher: Arc<Dispatcher>,
}

async fn index() -> &'static str {
    BANNER
}

async fn healthz() {}

/// Build the HTTP surface around a dispatcher. `/metrics` is only routed
/// when a Prometheus recorder handle is provided.
pub fn router(dispatcher: Dispatcher, metrics: Option<PrometheusHandle>) -> Router {
    let state = State {
        dispatcher: Arc::new(dispatcher),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/message", any(hook::webhook))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
