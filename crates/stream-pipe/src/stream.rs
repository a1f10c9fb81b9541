//! Byte sources and sinks as seen by a pump.
//!
//! Both sides are shared (`Arc`) between the pump thread and the pipes that
//! reference them, so I/O goes through `&self`. Each side also offers a
//! `probe`: a health check that must not consume input or push output.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// A sequential byte source drained by exactly one pump.
pub trait ByteSource: Send + Sync {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    ///
    /// May block indefinitely.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the source is still worth reading. Never touches the stream.
    fn probe(&self) -> bool {
        true
    }
}

/// A sequential byte sink a pump can be bound to.
pub trait ByteSink: Send + Sync {
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()>;

    /// Whether the sink can take more bytes. Never writes or flushes.
    fn probe(&self) -> bool {
        true
    }
}

pub type SharedSource = Arc<dyn ByteSource>;
pub type SharedSink = Arc<dyn ByteSink>;

/// Identity of a source: the address of its shared allocation.
pub(crate) fn source_key(source: &SharedSource) -> usize {
    Arc::as_ptr(source).cast::<()>() as usize
}

/// Adapts any [`Read`] into a [`ByteSource`].
///
/// The source reports itself invalid after end of stream or a failed read,
/// which is the only health signal a plain reader gives without consuming
/// bytes.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: Mutex<R>,
    valid: AtomicBool,
}

impl<R: Read + Send> ReadSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(reader),
            valid: AtomicBool::new(true),
        }
    }

    /// Wrap `reader` ready to hand to a [`Pipe`](crate::Pipe).
    pub fn shared(reader: R) -> SharedSource
    where
        R: 'static,
    {
        Arc::new(Self::new(reader))
    }
}

impl<R: Read + Send> ByteSource for ReadSource<R> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.inner.lock().expect("read source mutex poisoned");
        match reader.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.valid.store(false, Ordering::Release);
                Ok(0)
            }
            Err(e) if e.kind() != io::ErrorKind::Interrupted => {
                self.valid.store(false, Ordering::Release);
                Err(e)
            }
            other => other,
        }
    }

    fn probe(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

/// Adapts any [`Write`] into a [`ByteSink`].
///
/// A failed write or flush marks the sink broken; the probe reads that flag
/// and never flushes.
#[derive(Debug)]
pub struct WriteSink<W> {
    inner: Mutex<W>,
    healthy: AtomicBool,
}

impl<W: Write + Send> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
            healthy: AtomicBool::new(true),
        }
    }

    /// Wrap `writer` ready to hand to a [`Pipe`](crate::Pipe).
    pub fn shared(writer: W) -> SharedSink
    where
        W: 'static,
    {
        Arc::new(Self::new(writer))
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner().expect("write sink mutex poisoned")
    }

    fn track<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.healthy.store(false, Ordering::Release);
        }
        result
    }
}

impl<W: Write + Send> ByteSink for WriteSink<W> {
    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let result = self
            .inner
            .lock()
            .expect("write sink mutex poisoned")
            .write_all(buf);
        self.track(result)
    }

    fn flush(&self) -> io::Result<()> {
        let result = self.inner.lock().expect("write sink mutex poisoned").flush();
        self.track(result)
    }

    fn probe(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

/// The host process's stdin as a source.
///
/// Always the same allocation, so every pipe reading stdin shares one pump
/// and one reader thread.
pub fn stdin_source() -> SharedSource {
    static STDIN: OnceLock<SharedSource> = OnceLock::new();
    Arc::clone(STDIN.get_or_init(|| ReadSource::shared(io::stdin())))
}

/// The host process's stdout as a sink.
pub fn stdout_sink() -> SharedSink {
    WriteSink::shared(io::stdout())
}

/// The host process's stderr as a sink.
pub fn stderr_sink() -> SharedSink {
    WriteSink::shared(io::stderr())
}
