//! GitLab serialises hook timestamps as `2022-10-17 14:44:20 +1300`, which is
//! not RFC 3339. This module parses that format into `time::OffsetDateTime`
//! and renders instants back out as RFC 3339 for everything downstream.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const GITLAB_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

#[derive(Error, Debug)]
#[error("invalid GitLab timestamp {raw:?}: {source}")]
pub struct TimestampError {
    pub raw: String,
    #[source]
    pub source: time::error::Parse,
}

/// A timestamp field of a GitLab hook payload.
///
/// GitLab leaves timestamps empty (or `null`) for things that have not
/// happened yet, so absence is a value here rather than an error. Callers that
/// require the instant check for it with [`GitLabTimestamp::instant`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitLabTimestamp(Option<OffsetDateTime>);

impl GitLabTimestamp {
    pub const ABSENT: GitLabTimestamp = GitLabTimestamp(None);

    /// Parse GitLab's wire format. `""` and `"null"` yield the absent value.
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        if raw.is_empty() || raw == "null" {
            return Ok(Self::ABSENT);
        }

        OffsetDateTime::parse(raw, GITLAB_FORMAT)
            .map(|instant| Self(Some(instant.to_offset(UtcOffset::UTC))))
            .map_err(|source| TimestampError {
                raw: raw.to_owned(),
                source,
            })
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    pub fn instant(&self) -> Option<OffsetDateTime> {
        self.0
    }
}

impl From<OffsetDateTime> for GitLabTimestamp {
    fn from(instant: OffsetDateTime) -> Self {
        Self(Some(instant.to_offset(UtcOffset::UTC)))
    }
}

/// Render an instant as an RFC 3339 string.
pub fn render_wire(instant: OffsetDateTime) -> Result<String, time::error::Format> {
    instant.to_offset(UtcOffset::UTC).format(&Rfc3339)
}

/// Parse the output of [`render_wire`].
pub fn parse_wire(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(raw, &Rfc3339)
}

struct GitLabTimestampVisitor;

impl<'de> Visitor<'de> for GitLabTimestampVisitor {
    type Value = GitLabTimestamp;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a timestamp formatted as `YYYY-MM-DD HH:MM:SS +HHMM`")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        GitLabTimestamp::parse(s).map_err(E::custom)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(GitLabTimestamp::ABSENT)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(GitLabTimestamp::ABSENT)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Deserialize<'de> for GitLabTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_option(GitLabTimestampVisitor)
    }
}

impl Serialize for GitLabTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            Some(instant) => {
                let rendered = render_wire(instant).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&rendered)
            }
            None => serializer.serialize_none(),
        }
    }
}
