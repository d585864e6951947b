//! Progress narration sink.
//!
//! Every lifecycle operation writes a human-readable narrative to a
//! progress sink: a matching "starting" and "OK"/"failed" pair per
//! operation. The lines are purely observational and never parsed.

use std::sync::Mutex;

use tracing::info;

/// An append-only text stream for progress lines.
///
/// `say` is synchronous so pipeline steps can narrate without awaiting;
/// implementations must not block for long.
pub trait Progress: Send + Sync {
    fn say(&self, line: &str);
}

/// Buffers lines in memory. Used by tests and by callers that want to
/// replay the narrative of an attempt.
#[derive(Default)]
pub struct BufferProgress {
    lines: Mutex<Vec<String>>,
}

impl BufferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Progress for BufferProgress {
    fn say(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// Forwards progress lines to the tracing subscriber.
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn say(&self, line: &str) {
        info!(target: "carton_provision::progress", "{line}");
    }
}
