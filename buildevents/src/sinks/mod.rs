use async_trait::async_trait;

use crate::api::HookError;
use crate::event::TelemetryEvent;

pub mod honeycomb;
pub mod print;

pub use honeycomb::{HoneycombConfig, HoneycombSink};
pub use print::PrintSink;

#[async_trait]
pub trait EventSink {
    async fn send(&self, event: TelemetryEvent) -> Result<(), HookError>;
}
