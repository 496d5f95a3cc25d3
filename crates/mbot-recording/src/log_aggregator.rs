//! Collapses repetitive success logs into periodic summaries.

use tracing::info;

/// Counts events and bytes, emitting one summary line per flush.
#[derive(Debug)]
pub struct LogAggregator {
    message: String,
    count: u64,
    bytes: u64,
}

impl LogAggregator {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            count: 0,
            bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.count += 1;
        self.bytes += bytes as u64;
    }

    /// Log the summary if anything was recorded and reset. Returns the event count.
    pub fn flush(&mut self) -> u64 {
        let count = self.count;
        if count > 0 {
            info!(count, bytes = self.bytes, "{} ({} times)", self.message, count);
        }
        self.count = 0;
        self.bytes = 0;
        count
    }

    pub fn pending(&self) -> u64 {
        self.count
    }
}
