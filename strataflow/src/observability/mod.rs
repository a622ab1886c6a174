//! Logging setup and span helpers.

mod spans;
mod subscriber;

pub use spans::{session_span, stage_span, SpanTimer};
pub use subscriber::{build_filter, init_tracing};
