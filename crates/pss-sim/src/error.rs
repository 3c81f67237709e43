//! Error types for the simulation kernel.
//!
//! Following the teacher's pattern of small, `Display`/`Error`-implementing
//! marker structs for expected, structurally-significant failures
//! (`durable_runtime::error::AbortError`), sink failures get their own type
//! here rather than being folded into `anyhow::Error`. Everything else
//! fallible in this crate (mainly task bodies) just uses `anyhow::Result`.

use std::fmt;

/// A logging sink failed to accept a write.
///
/// Per the error-handling design, a sink failure is reported once by the
/// caller (via `tracing::warn!`) and then suppressed; the simulation
/// continues running. This type only carries the underlying cause.
#[derive(Debug)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log sink failure: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}
