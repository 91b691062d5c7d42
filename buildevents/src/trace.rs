//! Identifiers stitching a pipeline and its jobs into a single trace.
//!
//! The pipeline is the root span and its span id is its trace id. Each job is
//! a child span whose id is derived from the job name and job id, so retried
//! deliveries of the same hook map onto the same span.

/// Trace id of a pipeline: the decimal pipeline id.
pub fn pipeline_trace_id(pipeline_id: i64) -> String {
    pipeline_id.to_string()
}

/// Span id of a job: lowercase hex MD5 of `job_name ++ job_id`.
pub fn job_span_id(job_name: &str, job_id: i64) -> String {
    let digest = md5::compute(format!("{job_name}{job_id}"));
    format!("{digest:x}")
}
