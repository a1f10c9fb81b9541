//! Pump: one reader thread per source, writing to whichever sink is bound.
//!
//! ```text
//!   source ──read()──▶ [ buf ] ──write_all()──▶ sink (rebindable)
//!                         │
//!                 no sink bound: park on condvar,
//!                 keep buf until the next connect()
//! ```
//!
//! Reads and writes strictly alternate: a buffer is fully delivered to one
//! sink before the next read. The sink slot is guarded by the pump's mutex,
//! which the pump holds while waiting and while writing, so `connect` never
//! races a write in progress.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use stream_monitor::StreamReporter;
use tracing::debug;

use crate::stream::{ByteSource, SharedSink};

/// Bytes read from the source per iteration.
pub const READ_BUF_SIZE: usize = 8192;

/// Runtime counters, readable while the pump runs.
#[derive(Debug, Default)]
pub struct PumpStats {
    pub reads: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    /// Bytes read but discarded because the sink they were written to broke.
    pub bytes_dropped: AtomicU64,
    /// Times the pump started waiting for a sink.
    pub parks: AtomicU64,
    /// Times the pump woke from waiting, spurious wakeups included.
    pub wakeups: AtomicU64,
}

/// Background mover from one source to a rebindable sink.
///
/// Created by [`PumpRegistry::acquire`](crate::PumpRegistry::acquire); the
/// thread it runs on ends when its source does.
pub struct Pump {
    name: Mutex<String>,
    sink: Mutex<Option<SharedSink>>,
    bound: Condvar,
    terminated: AtomicBool,
    stats: PumpStats,
    reporter: Arc<dyn StreamReporter>,
}

impl Pump {
    pub(crate) fn new(name: impl Into<String>, reporter: Arc<dyn StreamReporter>) -> Self {
        Self {
            name: Mutex::new(name.into()),
            sink: Mutex::new(None),
            bound: Condvar::new(),
            terminated: AtomicBool::new(false),
            stats: PumpStats::default(),
            reporter,
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().expect("pump name mutex poisoned").clone()
    }

    /// Rename the pump. The name labels log lines and reporter events.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().expect("pump name mutex poisoned") = name.into();
    }

    /// Bind `sink`, or unbind with `None`.
    ///
    /// Binding wakes a parked pump, which first delivers any bytes it is
    /// holding. Unbinding does not wake it: the pump parks at its next write.
    pub fn connect(&self, sink: Option<SharedSink>) {
        let mut slot = self.sink.lock().expect("pump sink mutex poisoned");
        *slot = sink;
        if slot.is_some() {
            self.bound.notify_all();
        }
    }

    /// Unbind `sink` if it is the one currently bound. Returns whether it was.
    pub fn disconnect(&self, sink: &SharedSink) -> bool {
        let mut slot = self.sink.lock().expect("pump sink mutex poisoned");
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, sink) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sink.lock().expect("pump sink mutex poisoned").is_some()
    }

    /// True once the source ended or failed and the pump thread has exited
    /// its loop.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Drain `source` until it ends. Runs on the pump thread.
    pub(crate) fn run(&self, source: &dyn ByteSource) {
        let mut buf = vec![0u8; READ_BUF_SIZE];

        while source.probe() {
            let n = match source.read(&mut buf) {
                Ok(0) => {
                    debug!(pump = %self.name(), "source reached end of stream");
                    self.reporter.complete(&self.name());
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.source_failed(&e);
                    break;
                }
            };

            self.stats.reads.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            self.deliver(&buf[..n]);
        }

        self.terminated.store(true, Ordering::Release);
        debug!(pump = %self.name(), "pump stopped");
    }

    /// Write `data` to the bound sink, parking until a usable one is bound.
    fn deliver(&self, data: &[u8]) {
        let mut slot = self.sink.lock().expect("pump sink mutex poisoned");
        let mut parked = false;

        let sink = loop {
            if let Some(sink) = slot.as_ref().filter(|sink| sink.probe()) {
                break Arc::clone(sink);
            }
            if !parked {
                parked = true;
                self.stats.parks.fetch_add(1, Ordering::Relaxed);
                debug!(pump = %self.name(), held = data.len(), "parked waiting for a sink");
            }
            slot = self.bound.wait(slot).expect("pump sink mutex poisoned");
            self.stats.wakeups.fetch_add(1, Ordering::Relaxed);
        };

        match sink.write_all(data).and_then(|_| sink.flush()) {
            Ok(()) => {
                self.stats
                    .bytes_written
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                // The sink broke mid-write; its probe now fails and the next
                // delivery parks until a working sink is bound.
                self.stats
                    .bytes_dropped
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                self.reporter.error(
                    &self.name(),
                    &format!("sink write failed, {} bytes dropped: {}", data.len(), e),
                );
            }
        }
    }

    fn source_failed(&self, err: &io::Error) {
        if self.is_connected() {
            self.reporter
                .error(&self.name(), &format!("source read failed: {}", err));
        } else {
            // Nobody is listening for this pump's output.
            debug!(pump = %self.name(), "source read failed while unbound: {}", err);
        }
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pump")
            .field("name", &self.name())
            .field("connected", &self.is_connected())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
