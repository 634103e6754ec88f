use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::TaskId;

const MAX_LINE_BYTES: usize = 16 * 1024;
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LogLine {
    pub task_id: TaskId,
    pub stream: LogStream,
    pub sequence: u64,
    pub text: String,
}

/// Receives tool output one line at a time, in the order the child produced it.
pub trait LogSink: Send + Sync {
    fn line(&self, line: &LogLine);
}

pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn line(&self, _line: &LogLine) {}
}

pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn line(&self, line: &LogLine) {
        tracing::info!(
            target: "repour::live_log",
            task_id = %line.task_id,
            stream = ?line.stream,
            sequence = line.sequence,
            "{}",
            line.text
        );
    }
}

/// Fans lines out to any number of live subscribers. Lagging subscribers lose
/// the oldest lines rather than stalling the tool.
#[derive(Clone)]
pub struct BroadcastLogSink {
    sender: broadcast::Sender<LogLine>,
}

impl Default for BroadcastLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastLogSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sender.subscribe()
    }
}

impl LogSink for BroadcastLogSink {
    fn line(&self, line: &LogLine) {
        // No subscribers is the common case.
        let _ = self.sender.send(line.clone());
    }
}

#[derive(Clone, Default)]
pub struct MultiLogSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl MultiLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for MultiLogSink {
    fn line(&self, line: &LogLine) {
        for sink in &self.sinks {
            sink.line(line);
        }
    }
}

/// Bounded window over the most recent lines of a process.
#[derive(Clone, Debug, Default)]
pub struct LogTail {
    capacity: usize,
    lines: VecDeque<String>,
    total: u64,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(1024)),
            total: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        self.total = self.total.saturating_add(1);
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

pub(crate) fn normalize_line(bytes: &[u8]) -> String {
    let trimmed = bytes
        .strip_suffix(b"\n")
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .unwrap_or(bytes);

    if trimmed.len() > MAX_LINE_BYTES {
        let mut text = String::from_utf8_lossy(&trimmed[..MAX_LINE_BYTES]).into_owned();
        text.push_str(" [truncated]");
        text
    } else {
        String::from_utf8_lossy(trimmed).into_owned()
    }
}
