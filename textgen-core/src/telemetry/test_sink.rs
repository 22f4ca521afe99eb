#![cfg(test)]

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use super::{CompletionLog, StreamLog, TelemetrySink};

static COMPLETIONS: Lazy<Mutex<Vec<CompletionLog>>> = Lazy::new(|| Mutex::new(Vec::new()));
static STREAMS: Lazy<Mutex<Vec<StreamLog>>> = Lazy::new(|| Mutex::new(Vec::new()));

struct CaptureSink;

impl TelemetrySink for CaptureSink {
    fn record_completion(&self, log: CompletionLog) {
        COMPLETIONS.lock().unwrap().push(log);
    }

    fn record_stream(&self, log: StreamLog) {
        STREAMS.lock().unwrap().push(log);
    }
}

/// Install the shared capture sink (first caller wins) and enable capture on this thread.
/// Tests share the sink, so each should filter by a model name of its own.
pub fn install() {
    let _ = super::set_telemetry_sink(Arc::new(CaptureSink));
    super::test_set_capture_enabled(true);
}

pub fn completions_for(model: &str) -> Vec<CompletionLog> {
    COMPLETIONS
        .lock()
        .unwrap()
        .iter()
        .filter(|l| l.model.as_deref() == Some(model))
        .cloned()
        .collect()
}

pub fn streams_for(model: &str) -> Vec<StreamLog> {
    STREAMS
        .lock()
        .unwrap()
        .iter()
        .filter(|l| l.model.as_deref() == Some(model))
        .cloned()
        .collect()
}
