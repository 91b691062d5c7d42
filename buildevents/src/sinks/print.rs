use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::api::HookError;
use crate::event::TelemetryEvent;
use crate::sinks::EventSink;

/// Writes events to the log instead of transmitting them. Used when no
/// Honeycomb API key is configured.
pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), HookError> {
        info!(
            timestamp = %event.timestamp,
            trace_id = event.trace_id().unwrap_or_default(),
            "event: {:?}",
            event.fields
        );
        counter!("buildevents_events_sent_total", "sink" => "print").increment(1);

        Ok(())
    }
}
