//! Cooperative cancellation for sessions and in-flight stages.

mod token;

pub use token::CancellationToken;
