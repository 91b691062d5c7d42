use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer};

use crate::api::{HookError, PayloadDecodeError};
use crate::timestamp::GitLabTimestamp;

/// The `X-Gitlab-Event` values we know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Pipeline,
    Job,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Pipeline => "Pipeline Hook",
            EventKind::Job => "Job Hook",
        }
    }

    pub(crate) fn noun(&self) -> &'static str {
        match self {
            EventKind::Pipeline => "pipeline",
            EventKind::Job => "job",
        }
    }
}

impl FromStr for EventKind {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pipeline Hook" => Ok(EventKind::Pipeline),
            "Job Hook" => Ok(EventKind::Job),
            other => Err(HookError::UnsupportedEventKind(other.to_owned())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded hook body.
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    Pipeline(PipelineEvent),
    Job(JobEvent),
}

impl HookPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            HookPayload::Pipeline(_) => EventKind::Pipeline,
            HookPayload::Job(_) => EventKind::Job,
        }
    }
}

/// Decode a hook body according to the event kind GitLab announced for it.
pub fn decode(kind: EventKind, body: Bytes) -> Result<HookPayload, HookError> {
    tracing::debug!(len = body.len(), kind = kind.as_str(), "decoding hook payload");

    let decoded = match kind {
        EventKind::Pipeline => serde_json::from_slice(&body).map(HookPayload::Pipeline),
        EventKind::Job => serde_json::from_slice(&body).map(HookPayload::Job),
    };

    decoded.map_err(|source| {
        HookError::PayloadDecode(PayloadDecodeError {
            kind,
            payload: body,
            source,
        })
    })
}

/// GitLab sends `null` for numbers and sub-objects that are not known yet
/// (durations of unfinished jobs, runners that were never assigned, ...).
/// Treat those as the zero value, the same way a missing field is treated.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub object_kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub object_attributes: PipelineAttributes,
    #[serde(default, deserialize_with = "null_as_default")]
    pub merge_request: MergeRequest,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: User,
    #[serde(default, deserialize_with = "null_as_default")]
    pub project: Project,
    #[serde(default, deserialize_with = "null_as_default")]
    pub commit: Commit,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineAttributes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(rename = "ref", default, deserialize_with = "null_as_default")]
    pub ref_: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sha: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub before_sha: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stages: Vec<String>,
    #[serde(default)]
    pub created_at: GitLabTimestamp,
    #[serde(default)]
    pub finished_at: GitLabTimestamp,
    /// Seconds. Zero until the pipeline finishes.
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: i64,
    /// Seconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub queued_duration: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MergeRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub iid: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_branch: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_project_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_branch: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_project_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Project {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub web_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path_with_namespace: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Commit {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub object_kind: String,
    #[serde(rename = "ref", default, deserialize_with = "null_as_default")]
    pub ref_: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sha: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_stage: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_status: String,
    #[serde(default)]
    pub build_created_at: GitLabTimestamp,
    #[serde(default)]
    pub build_started_at: GitLabTimestamp,
    #[serde(default)]
    pub build_finished_at: GitLabTimestamp,
    /// Seconds, fractional.
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_duration: f64,
    /// Seconds, fractional.
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_queued_duration: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_allow_failure: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub build_failure_reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pipeline_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: User,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: Repository,
    #[serde(default, deserialize_with = "null_as_default")]
    pub runner: Runner,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Repository {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub homepage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Runner {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_shared: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}
