//! Background pumps between blocking byte sources and rebindable sinks.
//!
//! A blocking read on something like stdin can't be cancelled. Rather than
//! leak a reader thread every time a consumer goes away, this crate runs one
//! [`Pump`] per source and lets [`Pipe`]s bind and unbind sinks on it. When
//! no sink is bound the pump parks with whatever it last read, so bytes
//! survive a handover from one consumer to the next.
//!
//! ```rust,no_run
//! use stream_pipe::{stdin_source, stdout_sink, Pipe};
//!
//! let pipe = Pipe::new(stdin_source(), stdout_sink());
//! pipe.start("stdin echo").unwrap();
//! // ... later; the pump keeps stdin and holds what it reads next
//! pipe.stop();
//! ```

pub mod pipe;
pub mod pump;
pub mod registry;
pub mod stream;

pub use pipe::{Pipe, PipeError};
pub use pump::{Pump, PumpStats, READ_BUF_SIZE};
pub use registry::PumpRegistry;
pub use stream::{
    stderr_sink, stdin_source, stdout_sink, ByteSink, ByteSource, ReadSource, SharedSink,
    SharedSource, WriteSink,
};
