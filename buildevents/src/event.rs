use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A span ready to be handed to a sink: a flat field map plus the instant the
/// span started.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub fields: HashMap<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip)]
    pub overrides: SinkOverrides,
}

impl TelemetryEvent {
    pub fn new(fields: HashMap<String, Value>, timestamp: OffsetDateTime) -> Self {
        Self {
            fields,
            timestamp,
            overrides: SinkOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: SinkOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.field("trace.trace_id").and_then(Value::as_str)
    }
}

/// Per-request sink settings, read from the hook URL's query string. Unset or
/// empty values fall back to the process-wide configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SinkOverrides {
    pub api_key: Option<String>,
    pub dataset: Option<String>,
    pub api_host: Option<String>,
}

impl SinkOverrides {
    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn dataset(&self) -> Option<&str> {
        non_empty(&self.dataset)
    }

    pub fn api_host(&self) -> Option<&str> {
        non_empty(&self.api_host)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
