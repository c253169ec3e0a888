//! Cross-cutting helpers: errors, logging, evidence sanitization, client
//! address extraction, period parsing, and payload decoding.

pub mod decode;
pub mod error;
pub mod logging;
pub mod net;
pub mod period;
pub mod sanitize;

pub use error::{log_error, ErrorCategory, Result, SentinelError};

/// Milliseconds since the Unix epoch, the timestamp unit used across block
/// records and queue messages.
pub fn epoch_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
