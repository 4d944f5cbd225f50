//! Destinations for formatted debug output.

use std::sync::{Mutex, MutexGuard};

/// Receives debug-level messages.
///
/// Writing is best effort: implementations swallow their own failures, callers
/// never retry.
pub trait LogSink: Send + Sync {
    fn debug(&self, message: &str);
}

/// Forwards messages to `tracing` at debug level under the `querylog` target.
///
/// Enable it with a filter such as `RUST_LOG=querylog=debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "querylog", "{message}");
    }
}

/// Keeps every message in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn messages(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn debug(&self, message: &str) {
        self.lock().push(message.to_owned());
    }
}
