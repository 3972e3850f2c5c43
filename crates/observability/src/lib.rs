//! Tracing/logging setup shared by every process embedding the core.

pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings, ParseLogFormatError};

/// Initialize process-wide tracing/logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings) {
    crate::tracing::init(settings);
}
