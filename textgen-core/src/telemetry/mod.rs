//! Telemetry hooks for completions and stream sessions.
//! By default, nothing is emitted unless a sink is installed via `set_telemetry_sink`.

pub mod types;
#[cfg(test)]
pub mod test_sink;

pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive telemetry events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - Methods **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; stream events fire when a session ends.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_completion(&self, log: CompletionLog);

    fn record_stream(&self, _log: StreamLog) {}
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
fn sink() -> Option<&'static Arc<dyn TelemetrySink>> {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return None;
        }
    }
    TELEMETRY_SINK.get()
}

pub(crate) fn emit_completion(log: CompletionLog) {
    if let Some(sink) = sink() {
        sink.record_completion(log);
    }
}

pub(crate) fn emit_stream(log: StreamLog) {
    if let Some(sink) = sink() {
        sink.record_stream(log);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
///
/// Spawned threads in a test must call this as well if they should emit.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
