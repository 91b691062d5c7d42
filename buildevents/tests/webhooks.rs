use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_json_diff::assert_json_include;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use time::macros::datetime;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use buildevents::api::HookError;
use buildevents::event::TelemetryEvent;
use buildevents::hook::Dispatcher;
use buildevents::router::{router, BANNER};
use buildevents::shaper::EventShaper;
use buildevents::sinks::{EventSink, HoneycombConfig, HoneycombSink};

#[derive(Clone, Default)]
struct MemorySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl MemorySink {
    fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), HookError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn app(secret: Option<&str>) -> (Router, MemorySink) {
    let sink = MemorySink::default();
    let dispatcher = Dispatcher::new(
        secret.map(str::to_owned),
        EventShaper::new("0.1.0"),
        Arc::new(sink.clone()),
        false,
    );

    (router(dispatcher, None), sink)
}

fn hook(kind: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/message")
        .header("X-Gitlab-Event", kind)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn pipeline_hook(status: &str, duration: i64) -> Value {
    json!({
        "object_kind": "pipeline",
        "object_attributes": {
            "id": 1,
            "ref": "main",
            "source": "push",
            "status": status,
            "created_at": "2022-10-17 14:44:20 +0000",
            "duration": duration,
            "queued_duration": 1
        },
        "merge_request": null,
        "project": {"web_url": "https://gitlab.example.com/group/project"}
    })
}

fn job_hook(status: &str, duration: f64, queued: f64) -> Value {
    json!({
        "object_kind": "build",
        "ref": "main",
        "build_id": 1,
        "build_name": "build",
        "build_stage": "build",
        "build_status": status,
        "build_started_at": "2022-10-17 14:44:20 +0000",
        "build_duration": duration,
        "build_queued_duration": queued,
        "pipeline_id": 1,
        "repository": {"homepage": "https://gitlab.example.com/group/project"},
        "runner": {"id": 42, "description": "shared-runner-1"}
    })
}

#[tokio::test]
async fn finished_pipeline_becomes_root_span() {
    let (app, sink) = app(None);

    let (status, body) = call(app, hook("Pipeline Hook", &pipeline_hook("success", 5))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Thanks!\n");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, datetime!(2022-10-17 14:44:20 UTC));
    assert_json_include!(
        actual: json!(events[0].fields),
        expected: json!({
            "ci_provider": "GitLab-CI",
            "meta.version": "0.1.0",
            "service_name": "pipeline",
            "name": "build 1",
            "trace.trace_id": "1",
            "trace.span_id": "1",
            "branch": "main",
            "build_num": 1,
            "build_url": "https://gitlab.example.com/group/project/-/pipelines/1",
            "status": "success",
            "source": "push",
            "duration_ms": 5000,
            "queued_duration_ms": 1000
        })
    );
    assert!(!events[0].fields.contains_key("trace.parent_id"));
}

#[tokio::test]
async fn finished_job_becomes_child_span() {
    let (app, sink) = app(None);

    let (status, _) = call(app, hook("Job Hook", &job_hook("success", 5.0, 90.0))).await;
    assert_eq!(status, StatusCode::OK);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_json_include!(
        actual: json!(events[0].fields),
        expected: json!({
            "service_name": "job",
            "name": "build",
            "trace.trace_id": "1",
            "trace.parent_id": "1",
            "trace.span_id": "d48124e03d646d7bdf0ba9b335983d84",
            "stage": "build",
            "status": "success",
            "repo": "https://gitlab.example.com/group/project",
            "ci_runner": "shared-runner-1",
            "ci_runner_id": 42,
            "duration_ms": 5000.0,
            "queued_duration_ms": 90000.0,
            "queued_duration_min": 1
        })
    );
}

#[tokio::test]
async fn running_pipeline_is_acknowledged_without_event() {
    let (app, sink) = app(None);

    let (status, body) = call(app, hook("Pipeline Hook", &pipeline_hook("running", 5))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Thanks!\n");
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn queued_only_job_is_acknowledged_without_event() {
    let (app, sink) = app(None);

    let (status, _) = call(app, hook("Job Hook", &job_hook("pending", 0.0, 30.0))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn unknown_event_kind_is_rejected() {
    let (app, sink) = app(None);

    let (status, body) = call(app, hook("Foo Hook", &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid event type: Foo Hook");
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (app, sink) = app(None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/message")
        .header("X-Gitlab-Event", "Pipeline Hook")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("failed to parse payload into pipeline event"));
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn finished_pipeline_without_created_at_is_a_server_error() {
    let (app, sink) = app(None);
    let mut body = pipeline_hook("success", 5);
    body["object_attributes"]["created_at"] = json!("");

    let (status, body) = call(app, hook("Pipeline Hook", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "created_at is not set");
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn missing_start_time_is_a_server_error() {
    let (app, sink) = app(None);
    let mut body = job_hook("success", 5.0, 0.0);
    body["build_started_at"] = Value::Null;

    let (status, _) = call(app, hook("Job Hook", &body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn only_post_is_accepted() {
    let (app, _) = app(None);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/message")
        .header("X-Gitlab-Event", "Pipeline Hook")
        .body(Body::empty())
        .unwrap();

    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "unsupported method, webhooks must be POSTed");
}

#[tokio::test]
async fn event_header_is_required() {
    let (app, _) = app(None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/message")
        .body(Body::from(pipeline_hook("success", 5).to_string()))
        .unwrap();

    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "missing header: X-Gitlab-Event");
}

#[tokio::test]
async fn secret_must_match_token() {
    let (app, sink) = app(Some("s3cret"));

    let (status, body) = call(
        app.clone(),
        hook("Pipeline Hook", &pipeline_hook("success", 5)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "X-Gitlab-Token validation failed");

    let mut request = hook("Pipeline Hook", &pipeline_hook("success", 5));
    request
        .headers_mut()
        .insert("x-gitlab-token", "s3cret".parse().unwrap());
    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn query_overrides_are_attached() {
    let (app, sink) = app(None);

    let mut request = hook("Pipeline Hook", &pipeline_hook("success", 5));
    *request.uri_mut() = "/api/message?dataset=other&api_key=abc".parse().unwrap();

    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);

    let events = sink.events();
    assert_eq!(events[0].overrides.dataset(), Some("other"));
    assert_eq!(events[0].overrides.api_key(), Some("abc"));
    assert_eq!(events[0].overrides.api_host(), None);
}

#[tokio::test]
async fn healthz_and_banner() {
    let (app, _) = app(None);

    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "");

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, BANNER);
    assert!(body.contains("POST /api/message"));
}

#[tokio::test]
async fn api_host_in_query_cannot_redirect_the_configured_key() {
    let configured = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/events/ci"))
        .and(header("X-Honeycomb-Team", "configured-key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&configured)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let (sink, flushed) = HoneycombSink::new(
        HoneycombConfig {
            api_key: "configured-key".to_owned(),
            dataset: "ci".to_owned(),
            api_host: configured.uri(),
        },
        "0.1.0",
        Duration::from_secs(5),
        16,
        2,
    )
    .unwrap();
    let dispatcher = Dispatcher::new(None, EventShaper::new("0.1.0"), Arc::new(sink), false);
    let app = router(dispatcher, None);

    let mut request = hook("Pipeline Hook", &pipeline_hook("success", 5));
    *request.uri_mut() = format!("/api/message?api_host={}", elsewhere.uri())
        .parse()
        .unwrap();

    let (status, _) = call(app, request).await;
    assert_eq!(status, StatusCode::OK);

    flushed.await.unwrap();
    assert!(elsewhere.received_requests().await.unwrap().is_empty());
}
