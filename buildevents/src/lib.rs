pub mod api;
pub mod config;
pub mod event;
pub mod hook;
pub mod payload;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod shaper;
pub mod sinks;
pub mod timestamp;
pub mod trace;
