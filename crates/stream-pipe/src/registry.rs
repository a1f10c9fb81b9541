//! PumpRegistry: at most one pump per source.
//!
//! Reading a source like stdin can't be interrupted, so a reader thread can't
//! be stopped and replaced. Instead the registry keeps one pump per source and
//! lets pipes come and go, rebinding the pump's sink. A pump leaves the
//! registry when its source ends.
//!
//! Sources are keyed by identity (the address of their `Arc` allocation), not
//! by value. Entries hold the source weakly; a stale entry (source dropped or
//! pump finished) is swept on the next lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;

use stream_monitor::{StreamReporter, TracingReporter};
use tracing::debug;

use crate::pipe::PipeError;
use crate::pump::Pump;
use crate::stream::{source_key, ByteSource, SharedSource};

struct Entry {
    source: Weak<dyn ByteSource>,
    pump: Arc<Pump>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.source.strong_count() > 0 && !self.pump.is_terminated()
    }
}

/// Maps each live source to the pump draining it.
pub struct PumpRegistry {
    pumps: Mutex<HashMap<usize, Entry>>,
    reporter: Arc<dyn StreamReporter>,
}

impl PumpRegistry {
    /// A private registry whose pumps report through `tracing`.
    pub fn new() -> Arc<Self> {
        Self::with_reporter(Arc::new(TracingReporter))
    }

    /// A private registry whose pumps report to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn StreamReporter>) -> Arc<Self> {
        Arc::new(Self {
            pumps: Mutex::new(HashMap::new()),
            reporter,
        })
    }

    /// The process-wide registry.
    ///
    /// Created on first use and never torn down; its pumps exit when their
    /// sources close, and pump threads never keep the process alive.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PumpRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(PumpRegistry::new))
    }

    /// The pump for `source`, spawning one if none is running.
    pub fn acquire(self: &Arc<Self>, source: &SharedSource) -> Result<Arc<Pump>, PipeError> {
        let key = source_key(source);
        let mut pumps = self.pumps.lock().expect("pump registry mutex poisoned");
        pumps.retain(|_, entry| entry.is_live());

        if let Some(entry) = pumps.get(&key) {
            if Weak::ptr_eq(&entry.source, &Arc::downgrade(source)) {
                return Ok(Arc::clone(&entry.pump));
            }
        }

        let pump = Arc::new(Pump::new("pump", Arc::clone(&self.reporter)));
        let registry = Arc::downgrade(self);
        let thread_pump = Arc::clone(&pump);
        let thread_source = Arc::clone(source);

        // The handle is dropped: the thread is detached and never joined.
        thread::Builder::new()
            .name("stream-pump".to_string())
            .spawn(move || {
                thread_pump.run(thread_source.as_ref());
                if let Some(registry) = registry.upgrade() {
                    registry.release_key(key, &thread_pump);
                }
            })?;

        debug!(source = key, "spawned pump");
        pumps.insert(
            key,
            Entry {
                source: Arc::downgrade(source),
                pump: Arc::clone(&pump),
            },
        );
        Ok(pump)
    }

    /// Deregister `pump` from `source`, but only if it is still the pump
    /// registered for it. Pumps call this on their way out.
    pub fn release(&self, source: &SharedSource, pump: &Arc<Pump>) -> bool {
        self.release_key(source_key(source), pump)
    }

    fn release_key(&self, key: usize, pump: &Arc<Pump>) -> bool {
        let mut pumps = self.pumps.lock().expect("pump registry mutex poisoned");
        match pumps.get(&key) {
            Some(entry) if Arc::ptr_eq(&entry.pump, pump) => {
                pumps.remove(&key);
                debug!(source = key, "pump deregistered");
                true
            }
            _ => false,
        }
    }

    /// The running pump for `source`, if any. Never spawns.
    pub fn get(&self, source: &SharedSource) -> Option<Arc<Pump>> {
        let pumps = self.pumps.lock().expect("pump registry mutex poisoned");
        pumps
            .get(&source_key(source))
            .filter(|entry| entry.is_live())
            .filter(|entry| Weak::ptr_eq(&entry.source, &Arc::downgrade(source)))
            .map(|entry| Arc::clone(&entry.pump))
    }

    /// Number of live pumps.
    pub fn len(&self) -> usize {
        self.pumps
            .lock()
            .expect("pump registry mutex poisoned")
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PumpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpRegistry").field("pumps", &self.len()).finish()
    }
}
