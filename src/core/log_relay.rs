//! Log relay - Drains the child's output streams into a log sink

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default number of lines kept by [`LogBuffer`]
pub const DEFAULT_LOG_CAPACITY: usize = 5000;

/// Largest number of lines a [`LogBuffer`] will hold
pub const MAX_LOG_CAPACITY: usize = 1_000_000;

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single line of output from the supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Receives log lines as the relay reads them.
///
/// Called from the relay threads, so implementations must be thread-safe.
pub trait LogSink: Send + Sync {
    fn push(&self, line: LogLine);
}

impl<F> LogSink for F
where
    F: Fn(LogLine) + Send + Sync,
{
    fn push(&self, line: LogLine) {
        self(line)
    }
}

/// Reads one output stream line by line and hands each line to a sink
pub struct LogRelay;

impl LogRelay {
    /// Run the relay on a dedicated thread until the stream closes
    pub fn spawn<R>(reader: R, stream: LogStream, sink: Arc<dyn LogSink>) -> std::io::Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
    {
        std::thread::Builder::new()
            .name(format!("log-relay-{}", stream))
            .spawn(move || {
                let lines = Self::drain(reader, stream, sink.as_ref());
                debug!("Log relay for {} finished after {} lines", stream, lines);
            })
    }

    /// Read `reader` to the end, pushing every line to `sink` in order.
    ///
    /// Returns the number of lines delivered. A read error ends the relay; it is
    /// logged and otherwise ignored.
    pub fn drain<R: Read>(reader: R, stream: LogStream, sink: &dyn LogSink) -> usize {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut delivered = 0;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let text = String::from_utf8_lossy(&buf);
                    sink.push(LogLine::new(stream, text));
                    delivered += 1;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Log relay for {} stopped on read error: {}", stream, e);
                    break;
                }
            }
        }

        delivered
    }
}

/// Bounded in-memory log sink.
///
/// Keeps the most recent `capacity` lines; older lines are evicted.
/// Capacity is clamped to `1..=MAX_LOG_CAPACITY`.
pub struct LogBuffer {
    ring: Mutex<HeapRb<LogLine>>,
    received: AtomicU64,
    evicted: AtomicU64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.clamp(1, MAX_LOG_CAPACITY))),
            received: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Maximum number of lines kept
    pub fn capacity(&self) -> usize {
        self.ring
            .lock()
            .map(|ring| ring.capacity().get())
            .unwrap_or(0)
    }

    /// Copy of all buffered lines, oldest first
    pub fn lines(&self) -> Vec<LogLine> {
        self.ring
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy of the newest `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        self.ring
            .lock()
            .map(|ring| {
                let skip = ring.occupied_len().saturating_sub(n);
                ring.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Buffered text joined by newlines, as a log view would show it
    pub fn render(&self) -> String {
        let ring = match self.ring.lock() {
            Ok(ring) => ring,
            Err(_) => return String::new(),
        };
        let mut out = String::new();
        for line in ring.iter() {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.ring.lock().map(|ring| ring.occupied_len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buffered lines
    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }

    /// Lines received since creation
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Lines pushed out by newer ones
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogSink for LogBuffer {
    fn push(&self, line: LogLine) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut ring) = self.ring.lock() {
            if ring.is_full() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            ring.push_overwrite(line);
        }
    }
}
