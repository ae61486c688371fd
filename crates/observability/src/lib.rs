//! Tracing and logging setup shared by every binary that embeds the engine.

/// Subscriber configuration (format, filters).
pub mod tracing;

pub use crate::tracing::{LogFormat, ObservabilityConfig, ObservabilityError};

/// Initialize process-wide tracing from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
/// An unreadable `PRODLINE_LOG_FORMAT` falls back to JSON output.
pub fn init() {
    crate::tracing::init(ObservabilityConfig::from_env().unwrap_or_default());
}
