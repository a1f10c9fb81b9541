//! Reporting for long-running byte streams.
//!
//! Anything that moves bytes (store ingest, a pump draining a child process)
//! reports through a [`StreamReporter`]. A reporter has three events:
//!
//! - `update` while bytes are flowing
//! - `complete` once the stream finished cleanly
//! - `error` when the stream failed
//!
//! Reporters compose by fan-out through a [`ReporterRouter`] rather than by
//! layering wrappers.
//!
//! ```rust
//! use std::sync::Arc;
//! use stream_monitor::{ReporterRouter, StreamReporter, TracingReporter};
//!
//! let router = ReporterRouter::new();
//! router.add(Arc::new(TracingReporter));
//! router.update("ingest", Some(1024), 512);
//! router.complete("ingest");
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error, trace};

/// Receives progress and failure events for a labelled stream.
///
/// `resource` identifies what is being moved (a file name, a pump name).
/// Implementations must not block for long: they run on the I/O path.
pub trait StreamReporter: Send + Sync {
    /// Bytes are flowing. `expected` is the total when known up front.
    fn update(&self, resource: &str, expected: Option<u64>, count: u64);

    /// The stream reached its end without error.
    fn complete(&self, resource: &str);

    /// The stream failed. `message` is a plain English description.
    fn error(&self, resource: &str, message: &str);
}

/// Reports through `tracing`. This is the default reporter everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StreamReporter for TracingReporter {
    fn update(&self, resource: &str, expected: Option<u64>, count: u64) {
        trace!(resource, ?expected, count, "stream progress");
    }

    fn complete(&self, resource: &str) {
        debug!(resource, "stream complete");
    }

    fn error(&self, resource: &str, message: &str) {
        error!(resource, "stream failed: {}", message);
    }
}

/// Writes a single human-readable progress line to a writer, e.g. stderr.
///
/// Percentages are shown when the expected size is known, otherwise a byte
/// count. Completion prints the average throughput.
pub struct PrintReporter<W: Write + Send> {
    out: Mutex<PrintState<W>>,
}

struct PrintState<W> {
    out: W,
    started: Option<Instant>,
    last_count: u64,
}

impl<W: Write + Send> PrintReporter<W> {
    /// Create a reporter printing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(PrintState {
                out,
                started: None,
                last_count: 0,
            }),
        }
    }

    /// Consume the reporter and hand back the writer.
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .expect("print reporter mutex poisoned")
            .out
    }
}

impl<W: Write + Send> StreamReporter for PrintReporter<W> {
    fn update(&self, resource: &str, expected: Option<u64>, count: u64) {
        let mut state = self.out.lock().expect("print reporter mutex poisoned");
        state.started.get_or_insert_with(Instant::now);
        state.last_count = count;
        // Progress output is advisory; a closed terminal must not fail the stream.
        let _ = match expected {
            Some(total) if total > 0 => {
                write!(state.out, "{} : {}%    \r", resource, count * 100 / total)
            }
            _ => write!(state.out, "{} : {} bytes    \r", resource, count),
        };
        let _ = state.out.flush();
    }

    fn complete(&self, resource: &str) {
        let mut state = self.out.lock().expect("print reporter mutex poisoned");
        let elapsed = state
            .started
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        let kbps = if elapsed > 0.0 {
            (state.last_count as f64 / 1024.0 / elapsed) as u64
        } else {
            0
        };
        let _ = writeln!(state.out, "{} : {} kBps.          ", resource, kbps);
    }

    fn error(&self, resource: &str, message: &str) {
        let mut state = self.out.lock().expect("print reporter mutex poisoned");
        let _ = writeln!(state.out, "{} : {}", resource, message);
    }
}

/// Fans every event out to a list of reporters, in registration order.
#[derive(Default)]
pub struct ReporterRouter {
    reporters: Mutex<Vec<Arc<dyn StreamReporter>>>,
}

impl ReporterRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter.
    pub fn add(&self, reporter: Arc<dyn StreamReporter>) {
        self.reporters
            .lock()
            .expect("reporter router mutex poisoned")
            .push(reporter);
    }

    /// Unregister a reporter previously passed to [`add`](Self::add).
    ///
    /// Matches by identity. Returns whether anything was removed.
    pub fn remove(&self, reporter: &Arc<dyn StreamReporter>) -> bool {
        let mut reporters = self.reporters.lock().expect("reporter router mutex poisoned");
        let before = reporters.len();
        reporters.retain(|r| !Arc::ptr_eq(r, reporter));
        reporters.len() != before
    }

    pub fn len(&self) -> usize {
        self.reporters.lock().expect("reporter router mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn StreamReporter>> {
        self.reporters
            .lock()
            .expect("reporter router mutex poisoned")
            .clone()
    }
}

impl StreamReporter for ReporterRouter {
    fn update(&self, resource: &str, expected: Option<u64>, count: u64) {
        for reporter in self.snapshot() {
            reporter.update(resource, expected, count);
        }
    }

    fn complete(&self, resource: &str) {
        for reporter in self.snapshot() {
            reporter.complete(resource);
        }
    }

    fn error(&self, resource: &str, message: &str) {
        for reporter in self.snapshot() {
            reporter.error(resource, message);
        }
    }
}
