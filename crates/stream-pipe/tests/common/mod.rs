//! Sources, sinks and a reporter that tests can steer and inspect.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stream_monitor::StreamReporter;
use stream_pipe::{ByteSink, ByteSource, SharedSink, SharedSource};

/// A source fed chunk by chunk from the test. Reads block until a chunk
/// arrives; dropping the sender ends the stream.
pub struct ChannelSource {
    chunks: Mutex<Receiver<Vec<u8>>>,
    pending: Mutex<VecDeque<u8>>,
}

impl ChannelSource {
    pub fn new() -> (Sender<Vec<u8>>, SharedSource) {
        let (tx, rx) = channel();
        let source = Arc::new(Self {
            chunks: Mutex::new(rx),
            pending: Mutex::new(VecDeque::new()),
        });
        (tx, source)
    }
}

impl ByteSource for ChannelSource {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pending = self.pending.lock().unwrap();
        while pending.is_empty() {
            match self.chunks.lock().unwrap().recv() {
                Ok(chunk) => pending.extend(chunk),
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(pending.len());
        for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// A source whose first read blocks until released, then fails.
pub struct FailingSource {
    gate: Mutex<Receiver<()>>,
}

impl FailingSource {
    pub fn new() -> (Sender<()>, SharedSource) {
        let (tx, rx) = channel();
        (tx, Arc::new(Self { gate: Mutex::new(rx) }))
    }
}

impl ByteSource for FailingSource {
    fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        let _ = self.gate.lock().unwrap().recv();
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away"))
    }
}

/// An in-memory sink that can be told to fail its next write. After a
/// failure it stays broken.
#[derive(Default)]
pub struct MemorySink {
    data: Mutex<Vec<u8>>,
    fail_next: AtomicBool,
    broken: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn shared(self: &Arc<Self>) -> SharedSink {
        Arc::clone(self) as SharedSink
    }
}

impl ByteSink for MemorySink {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            self.broken.store(true, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader hung up"));
        }
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn probe(&self) -> bool {
        !self.broken.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Update(String, u64),
    Complete(String),
    Error(String, String),
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(_, message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl StreamReporter for RecordingReporter {
    fn update(&self, resource: &str, _expected: Option<u64>, count: u64) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Update(resource.to_string(), count));
    }

    fn complete(&self, resource: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Complete(resource.to_string()));
    }

    fn error(&self, resource: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(resource.to_string(), message.to_string()));
    }
}

/// Poll `done` until it holds or `timeout` passes. Returns whether it held.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
