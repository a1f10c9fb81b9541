//! Pipe: a user-facing (source, sink) pair backed by the source's pump.

use std::io;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::pump::Pump;
use crate::registry::PumpRegistry;
use crate::stream::{SharedSink, SharedSource};

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("failed to spawn pump thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Moves bytes from `source` to `sink` until stopped or the source ends.
///
/// Starting binds `sink` to the source's pump, taking over from any other
/// pipe on the same source. Stopping unbinds it without touching the source;
/// bytes read afterwards are held until some pipe binds a sink again.
/// Dropping a started pipe stops it.
pub struct Pipe {
    source: SharedSource,
    sink: SharedSink,
    registry: Arc<PumpRegistry>,
    pump: Mutex<Option<Arc<Pump>>>,
}

impl Pipe {
    /// A pipe using the process-wide [`PumpRegistry`].
    pub fn new(source: SharedSource, sink: SharedSink) -> Self {
        Self::with_registry(PumpRegistry::global(), source, sink)
    }

    pub fn with_registry(
        registry: Arc<PumpRegistry>,
        source: SharedSource,
        sink: SharedSink,
    ) -> Self {
        Self {
            source,
            sink,
            registry,
            pump: Mutex::new(None),
        }
    }

    /// Bind this pipe's sink to the source's pump, spawning the pump if
    /// needed. Starting an already started pipe does nothing.
    pub fn start(&self, name: &str) -> Result<&Self, PipeError> {
        let mut slot = self.pump.lock().expect("pipe mutex poisoned");
        if slot.is_some() {
            return Ok(self);
        }

        let pump = self.registry.acquire(&self.source)?;
        pump.set_name(name);
        pump.connect(Some(Arc::clone(&self.sink)));
        debug!(pipe = name, "pipe started");

        *slot = Some(pump);
        Ok(self)
    }

    /// Unbind this pipe's sink. The pump keeps reading and holds what it reads.
    ///
    /// If another pipe has since bound its own sink to the same pump, that
    /// binding is left alone.
    pub fn stop(&self) {
        let Some(pump) = self.pump.lock().expect("pipe mutex poisoned").take() else {
            return;
        };

        if pump.disconnect(&self.sink) {
            let name = pump.name();
            pump.set_name(format!("{} (disconnected)", name));
            debug!(pipe = %name, "pipe stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.pump.lock().expect("pipe mutex poisoned").is_some()
    }

    /// The pump this pipe is bound to, while started.
    pub fn pump(&self) -> Option<Arc<Pump>> {
        self.pump.lock().expect("pipe mutex poisoned").clone()
    }

    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("started", &self.is_started())
            .finish()
    }
}
