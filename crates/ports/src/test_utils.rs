use parking_lot::Mutex;

use crate::secondary::log_sink::{LogLevel, LogSink};

/// Sink that records every emitted line, for asserting on log output.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }

    /// True if any recorded line at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}
