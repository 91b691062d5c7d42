use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use thiserror::Error;

use crate::payload::EventKind;

/// Body returned to GitLab once a hook has been accepted.
pub const ACK_BODY: &str = "Thanks!\n";

/// A hook was received and handled, whether or not it produced an event.
#[derive(Debug, PartialEq, Eq)]
pub struct Ack;

impl IntoResponse for Ack {
    fn into_response(self) -> Response {
        (StatusCode::OK, ACK_BODY).into_response()
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("unsupported method, webhooks must be POSTed")]
    InvalidMethod,
    #[error("missing header: X-Gitlab-Event")]
    MissingEventKind,
    #[error("invalid header: X-Gitlab-Event")]
    AmbiguousEventKind,
    #[error("invalid event type: {0}")]
    UnsupportedEventKind(String),
    #[error("X-Gitlab-Token validation failed")]
    AuthenticationFailure,

    #[error(transparent)]
    PayloadDecode(#[from] PayloadDecodeError),

    #[error("{0} is not set")]
    MissingRequiredTimestamp(&'static str),

    #[error("failed to hand event to sink: {0}")]
    SinkTransmission(String),
}

impl HookError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            HookError::InvalidMethod => "invalid_method",
            HookError::MissingEventKind => "missing_event_kind",
            HookError::AmbiguousEventKind => "ambiguous_event_kind",
            HookError::UnsupportedEventKind(_) => "unsupported_event_kind",
            HookError::AuthenticationFailure => "authentication_failure",
            HookError::PayloadDecode(_) => "payload_decode",
            HookError::MissingRequiredTimestamp(_) => "missing_required_timestamp",
            HookError::SinkTransmission(_) => "sink_transmission",
        }
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        match self {
            HookError::InvalidMethod
            | HookError::MissingEventKind
            | HookError::AmbiguousEventKind
            | HookError::UnsupportedEventKind(_)
            | HookError::AuthenticationFailure
            | HookError::PayloadDecode(_) => (StatusCode::BAD_REQUEST, self.to_string()),

            HookError::MissingRequiredTimestamp(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }

            HookError::SinkTransmission(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        }
        .into_response()
    }
}

/// A hook body could not be decoded into the payload its event kind announced.
/// The raw bytes are kept so operators can see exactly what GitLab sent.
#[derive(Error, Debug)]
#[error("failed to parse payload into {} event: {source}", kind.noun())]
pub struct PayloadDecodeError {
    pub kind: EventKind,
    pub payload: Bytes,
    #[source]
    pub source: serde_json::Error,
}

impl PayloadDecodeError {
    /// Lossy rendering of the raw payload, for logs.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn ack_renders_thanks() {
        let response = Ack.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Thanks!\n");
    }

    #[test]
    fn client_errors_are_bad_requests() {
        for err in [
            HookError::InvalidMethod,
            HookError::MissingEventKind,
            HookError::AmbiguousEventKind,
            HookError::UnsupportedEventKind("Foo Hook".to_owned()),
            HookError::AuthenticationFailure,
        ] {
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn decode_errors_keep_the_payload() {
        let source = serde_json::from_slice::<serde_json::Value>(b"{nope").unwrap_err();
        let err = HookError::from(PayloadDecodeError {
            kind: EventKind::Job,
            payload: Bytes::from_static(b"{nope"),
            source,
        });

        assert!(err.to_string().starts_with("failed to parse payload into job event"));
        match &err {
            HookError::PayloadDecode(inner) => assert_eq!(inner.payload_lossy(), "{nope"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_timestamp_is_a_server_error() {
        let err = HookError::MissingRequiredTimestamp("created_at");
        assert_eq!(err.to_string(), "created_at is not set");
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
