use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::instrument;

use crate::api::HookError;
use crate::event::TelemetryEvent;
use crate::payload::{HookPayload, JobEvent, PipelineEvent};
use crate::trace::{job_span_id, pipeline_trace_id};

pub const CI_PROVIDER: &str = "GitLab-CI";

const RUNNING: &str = "running";

/// Turns decoded hooks into spans.
///
/// Pipelines become root spans and jobs become their children. Hooks for
/// entities that have not finished yet (still `running`, or with no duration
/// recorded) are suppressed: shaping returns `Ok(None)` for them.
#[derive(Debug, Clone)]
pub struct EventShaper {
    version: String,
}

impl EventShaper {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn shape(&self, payload: &HookPayload) -> Result<Option<TelemetryEvent>, HookError> {
        match payload {
            HookPayload::Pipeline(pipeline) => self.pipeline(pipeline),
            HookPayload::Job(job) => self.job(job),
        }
    }

    #[instrument(skip_all, fields(pipeline_id = pipeline.object_attributes.id))]
    pub fn pipeline(&self, pipeline: &PipelineEvent) -> Result<Option<TelemetryEvent>, HookError> {
        let attributes = &pipeline.object_attributes;
        if attributes.duration == 0 || attributes.status == RUNNING {
            tracing::debug!(status = %attributes.status, "pipeline not finished, skipping");
            return Ok(None);
        }

        let trace_id = pipeline_trace_id(attributes.id);
        let build_url = format!("{}/-/pipelines/{}", pipeline.project.web_url, attributes.id);

        let mut fields = self.base_fields();
        fields.extend([
            // Trace information: the pipeline is the root of its own trace
            ("service_name".to_owned(), json!("pipeline")),
            ("trace.span_id".to_owned(), json!(trace_id)),
            ("trace.trace_id".to_owned(), json!(trace_id)),
            ("name".to_owned(), json!(format!("build {trace_id}"))),
            // CI information
            ("branch".to_owned(), json!(attributes.ref_)),
            ("build_num".to_owned(), json!(attributes.id)),
            ("build_url".to_owned(), json!(build_url)),
            ("pr_number".to_owned(), json!(pipeline.merge_request.iid)),
            (
                "pr_branch".to_owned(),
                json!(pipeline.merge_request.source_branch),
            ),
            (
                "pr_repo".to_owned(),
                json!(pipeline.merge_request.source_project_id),
            ),
            ("repo".to_owned(), json!(pipeline.project.web_url)),
            ("status".to_owned(), json!(attributes.status)),
            ("source".to_owned(), json!(attributes.source)),
            // Timing
            (
                "duration_ms".to_owned(),
                json!(attributes.duration.saturating_mul(1000)),
            ),
            (
                "queued_duration_ms".to_owned(),
                json!(attributes.queued_duration.saturating_mul(1000)),
            ),
        ]);

        let timestamp = attributes
            .created_at
            .instant()
            .ok_or(HookError::MissingRequiredTimestamp("created_at"))?;

        let event = TelemetryEvent::new(fields, timestamp);
        tracing::debug!(event = ?event, "shaped pipeline event");
        Ok(Some(event))
    }

    #[instrument(skip_all, fields(pipeline_id = job.pipeline_id, job_id = job.build_id))]
    pub fn job(&self, job: &JobEvent) -> Result<Option<TelemetryEvent>, HookError> {
        if job.build_duration == 0.0 || job.build_status == RUNNING {
            tracing::debug!(status = %job.build_status, "job not finished, skipping");
            return Ok(None);
        }

        let parent_trace_id = pipeline_trace_id(job.pipeline_id);
        let span_id = job_span_id(&job.build_name, job.build_id);
        let queued = job.build_queued_duration;

        let mut fields = self.base_fields();
        fields.extend([
            // Trace information
            ("service_name".to_owned(), json!("job")),
            ("trace.span_id".to_owned(), json!(span_id)),
            ("trace.trace_id".to_owned(), json!(parent_trace_id)),
            ("trace.parent_id".to_owned(), json!(parent_trace_id)),
            ("name".to_owned(), json!(job.build_name)),
            // CI information
            ("branch".to_owned(), json!(job.ref_)),
            ("build_num".to_owned(), json!(job.pipeline_id)),
            ("build_id".to_owned(), json!(job.build_id)),
            ("stage".to_owned(), json!(job.build_stage)),
            ("repo".to_owned(), json!(job.repository.homepage)),
            ("status".to_owned(), json!(job.build_status)),
            // Runner information
            ("ci_runner".to_owned(), json!(job.runner.description)),
            ("ci_runner_id".to_owned(), json!(job.runner.id)),
            ("ci_runner_tags".to_owned(), json!(job.runner.tags.join(","))),
            // Timing
            ("queued_duration_ms".to_owned(), json!(queued * 1000.0)),
            (
                "queued_duration_min".to_owned(),
                json!((queued / 60.0).floor() as i64),
            ),
            ("duration_ms".to_owned(), json!(job.build_duration * 1000.0)),
        ]);

        let timestamp = job
            .build_started_at
            .instant()
            .ok_or(HookError::MissingRequiredTimestamp("build_started_at"))?;

        let event = TelemetryEvent::new(fields, timestamp);
        tracing::debug!(event = ?event, "shaped job event");
        Ok(Some(event))
    }

    fn base_fields(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("ci_provider".to_owned(), json!(CI_PROVIDER)),
            ("meta.version".to_owned(), json!(self.version)),
        ])
    }
}
