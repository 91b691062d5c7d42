use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use metrics::counter;
use tracing::instrument;

use crate::api::{Ack, HookError};
use crate::event::SinkOverrides;
use crate::payload::{self, EventKind, HookPayload};
use crate::router;
use crate::shaper::EventShaper;
use crate::sinks::EventSink;

pub const EVENT_HEADER: &str = "x-gitlab-event";
pub const TOKEN_HEADER: &str = "x-gitlab-token";

/// Receives hooks from GitLab and turns them into events for the sink.
pub struct Dispatcher {
    secret: Option<String>,
    shaper: EventShaper,
    sink: Arc<dyn EventSink + Send + Sync>,
    debug: bool,
}

impl Dispatcher {
    /// An empty `secret` disables token validation.
    pub fn new(
        secret: Option<String>,
        shaper: EventShaper,
        sink: Arc<dyn EventSink + Send + Sync>,
        debug: bool,
    ) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            shaper,
            sink,
            debug,
        }
    }

    /// Handle a single hook delivery whose `X-Gitlab-Event` header has
    /// already been extracted.
    #[instrument(skip_all, fields(kind = kind_header))]
    pub async fn handle(
        &self,
        kind_header: &str,
        token: Option<&str>,
        overrides: SinkOverrides,
        body: Bytes,
    ) -> Result<Ack, HookError> {
        let result = self.dispatch(kind_header, token, overrides, body).await;

        if let Err(err) = &result {
            counter!("buildevents_hook_errors_total", "reason" => err.reason()).increment(1);
            match err {
                HookError::PayloadDecode(decode) => tracing::error!(
                    kind = kind_header,
                    payload = %decode.payload_lossy(),
                    "failed to decode hook: {}",
                    err
                ),
                _ => tracing::error!(kind = kind_header, "failed to handle hook: {}", err),
            }
        }

        result
    }

    async fn dispatch(
        &self,
        kind_header: &str,
        token: Option<&str>,
        overrides: SinkOverrides,
        body: Bytes,
    ) -> Result<Ack, HookError> {
        if let Some(secret) = &self.secret {
            if token != Some(secret.as_str()) {
                return Err(HookError::AuthenticationFailure);
            }
        }

        let kind: EventKind = kind_header.parse()?;
        counter!("buildevents_hooks_received_total", "kind" => kind.noun()).increment(1);

        if self.debug {
            tracing::info!(payload = %String::from_utf8_lossy(&body), "received {}", kind);
        } else {
            tracing::debug!(payload = %String::from_utf8_lossy(&body), "received {}", kind);
        }

        let payload = payload::decode(kind, body)?;
        if self.debug {
            tracing::info!(payload = ?payload, "decoded {}", kind);
        }

        let shaped = match &payload {
            HookPayload::Pipeline(pipeline) => self.shaper.pipeline(pipeline)?,
            HookPayload::Job(job) => self.shaper.job(job)?,
        };

        let Some(event) = shaped else {
            counter!("buildevents_events_suppressed_total", "kind" => kind.noun()).increment(1);
            return Ok(Ack);
        };

        counter!("buildevents_events_emitted_total", "kind" => kind.noun()).increment(1);
        if let Err(err) = self.sink.send(event.with_overrides(overrides)).await {
            tracing::error!(kind = kind.noun(), "dropping event: {}", err);
        }

        Ok(Ack)
    }
}

/// `/api/message`: validate the request envelope and hand the body to the
/// dispatcher.
pub async fn webhook(
    State(state): State<router::State>,
    method: Method,
    Query(overrides): Query<SinkOverrides>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Ack, HookError> {
    if method != Method::POST {
        counter!("buildevents_hook_errors_total", "reason" => "invalid_method").increment(1);
        return Err(HookError::InvalidMethod);
    }

    let kind = match event_kind_header(&headers) {
        Ok(kind) => kind,
        Err(err) => {
            counter!("buildevents_hook_errors_total", "reason" => err.reason()).increment(1);
            tracing::warn!("rejecting hook: {}", err);
            return Err(err);
        }
    };
    let token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());

    state.dispatcher.handle(&kind, token, overrides, body).await
}

/// Exactly one `X-Gitlab-Event` value is accepted.
fn event_kind_header(headers: &HeaderMap) -> Result<String, HookError> {
    let mut values = headers.get_all(EVENT_HEADER).iter();

    match (values.next(), values.next()) {
        (None, _) => Err(HookError::MissingEventKind),
        (Some(_), Some(_)) => Err(HookError::AmbiguousEventKind),
        (Some(value), None) => Ok(String::from_utf8_lossy(value.as_bytes()).into_owned()),
    }
}
