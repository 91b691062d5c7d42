use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::api::HookError;
use crate::event::{SinkOverrides, TelemetryEvent};
use crate::sinks::EventSink;
use crate::timestamp::render_wire;

pub const DEFAULT_API_HOST: &str = "https://api.honeycomb.io";
pub const DEFAULT_DATASET: &str = "buildevents";

const TEAM_HEADER: &str = "X-Honeycomb-Team";
const EVENT_TIME_HEADER: &str = "X-Honeycomb-Event-Time";

/// Process-wide Honeycomb settings. Individual events may override any of
/// them through their `SinkOverrides`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoneycombConfig {
    pub api_key: String,
    pub dataset: String,
    pub api_host: String,
}

impl Default for HoneycombConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            dataset: DEFAULT_DATASET.to_owned(),
            api_host: DEFAULT_API_HOST.to_owned(),
        }
    }
}

/// Enumeration of errors that can happen while delivering a single event.
#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("invalid api host {0:?}")]
    InvalidApiHost(String, #[source] url::ParseError),
    #[error("api host {0:?} cannot be used as a base url")]
    CannotBeABase(String),
    #[error("failed to render event time: {0}")]
    EventTime(#[from] time::error::Format),
    #[error("request to honeycomb failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("honeycomb rejected event with status {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl TransmissionError {
    fn reason(&self) -> &'static str {
        match self {
            TransmissionError::InvalidApiHost(..) | TransmissionError::CannotBeABase(_) => {
                "invalid_api_host"
            }
            TransmissionError::EventTime(_) => "event_time",
            TransmissionError::Request(_) => "request",
            TransmissionError::Rejected { .. } => "rejected",
        }
    }
}

/// Ships events to the Honeycomb events API.
///
/// `send` only enqueues: a background task drains the queue and performs the
/// HTTP requests, bounded by a semaphore. Failed deliveries are logged and
/// counted but never retried. The task exits once every `HoneycombSink`
/// clone has been dropped and the queue is empty, so awaiting the handle
/// returned by [`HoneycombSink::new`] flushes outstanding events.
#[derive(Clone)]
pub struct HoneycombSink {
    queue: mpsc::Sender<TelemetryEvent>,
}

impl HoneycombSink {
    /// Build the sink and spawn its transmission task. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: HoneycombConfig,
        version: &str,
        request_timeout: Duration,
        max_queued_events: usize,
        max_concurrent_sends: usize,
    ) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("buildevents/{version} (GitLab-CI)"))
            .timeout(request_timeout)
            .build()?;

        let max_concurrent_sends = u32::try_from(max_concurrent_sends.max(1)).unwrap_or(u32::MAX);
        let (queue, receiver) = mpsc::channel(max_queued_events.clamp(1, Semaphore::MAX_PERMITS));
        let transmission = Transmission {
            client,
            config: Arc::new(config),
            semaphore: Arc::new(Semaphore::new(max_concurrent_sends as usize)),
            max_concurrent_sends,
        };
        let handle = tokio::spawn(transmission.run(receiver));

        Ok((Self { queue }, handle))
    }
}

#[async_trait]
impl EventSink for HoneycombSink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), HookError> {
        self.queue.try_send(event).map_err(|err| {
            let reason = match &err {
                mpsc::error::TrySendError::Full(_) => "queue_full",
                mpsc::error::TrySendError::Closed(_) => "queue_closed",
            };
            counter!("buildevents_sink_errors_total", "reason" => reason).increment(1);
            HookError::SinkTransmission(err.to_string())
        })
    }
}

struct Transmission {
    client: reqwest::Client,
    config: Arc<HoneycombConfig>,
    semaphore: Arc<Semaphore>,
    max_concurrent_sends: u32,
}

impl Transmission {
    async fn run(self, mut receiver: mpsc::Receiver<TelemetryEvent>) {
        while let Some(event) = receiver.recv().await {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                error!("transmission semaphore closed, dropping queued events");
                return;
            };

            let client = self.client.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                deliver(&client, &config, event).await;
                drop(permit);
            });
        }

        // Every in-flight delivery holds a permit until it finishes.
        if self
            .semaphore
            .acquire_many(self.max_concurrent_sends)
            .await
            .is_ok()
        {
            info!("honeycomb transmission queue drained");
        }
    }
}

async fn deliver(client: &reqwest::Client, config: &HoneycombConfig, event: TelemetryEvent) {
    let start = tokio::time::Instant::now();

    match send_event(client, config, &event).await {
        Ok(()) => {
            counter!("buildevents_events_sent_total", "sink" => "honeycomb").increment(1);
            metrics::histogram!("buildevents_sink_send_duration_seconds")
                .record(start.elapsed().as_secs_f64());
            debug!(trace_id = event.trace_id().unwrap_or_default(), "event delivered");
        }
        Err(err) => {
            counter!("buildevents_sink_errors_total", "reason" => err.reason()).increment(1);
            error!(
                trace_id = event.trace_id().unwrap_or_default(),
                "failed to deliver event to honeycomb: {}", err
            );
        }
    }
}

async fn send_event(
    client: &reqwest::Client,
    config: &HoneycombConfig,
    event: &TelemetryEvent,
) -> Result<(), TransmissionError> {
    let (api_key, api_host) = destination(config, &event.overrides);
    let dataset = event.overrides.dataset().unwrap_or(&config.dataset);

    let url = events_url(api_host, dataset)?;
    let event_time = render_wire(event.timestamp)?;

    let response = client
        .post(url)
        .header(TEAM_HEADER, api_key)
        .header(EVENT_TIME_HEADER, event_time)
        .json(&event.fields)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransmissionError::Rejected { status, body })
}

/// API key and host an event is sent with. The configured key only ever goes
/// to the configured host: a host override is honoured only together with a
/// key override.
fn destination<'a>(
    config: &'a HoneycombConfig,
    overrides: &'a SinkOverrides,
) -> (&'a str, &'a str) {
    match overrides.api_key() {
        Some(api_key) => (
            api_key,
            overrides.api_host().unwrap_or(config.api_host.as_str()),
        ),
        None => {
            if overrides.api_host().is_some() {
                warn!("ignoring api_host override without an api_key override");
            }
            (config.api_key.as_str(), config.api_host.as_str())
        }
    }
}

/// `{api_host}/1/events/{dataset}`, with the dataset percent-encoded as a
/// single path segment.
fn events_url(api_host: &str, dataset: &str) -> Result<Url, TransmissionError> {
    let mut url = Url::parse(api_host)
        .map_err(|err| TransmissionError::InvalidApiHost(api_host.to_owned(), err))?;

    url.path_segments_mut()
        .map_err(|()| TransmissionError::CannotBeABase(api_host.to_owned()))?
        .pop_if_empty()
        .extend(["1", "events", dataset]);

    Ok(url)
}
