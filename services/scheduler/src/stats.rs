//! Stats registration seam.
//!
//! Metrics registries live outside this crate. Components register gauges
//! through [`StatsProvider`]; embedders bridge that to whatever registry
//! they run.

use std::collections::HashMap;
use std::sync::Mutex;

/// A gauge read callback.
pub type GaugeFn = Box<dyn Fn() -> u64 + Send + Sync>;

/// Receiver for gauge registrations.
pub trait StatsProvider: Send + Sync {
    /// Register a gauge under `name`. The supplier is polled by the
    /// embedder's metrics exporter.
    fn make_gauge(&self, name: &'static str, supplier: GaugeFn);
}

/// Discards all registrations.
#[derive(Default)]
pub struct NullStatsProvider;

impl StatsProvider for NullStatsProvider {
    fn make_gauge(&self, _name: &'static str, _supplier: GaugeFn) {}
}

/// Holds registered gauges so they can be read back directly.
///
/// Useful in tests and in dev mode where no exporter is wired.
#[derive(Default)]
pub struct InMemoryStats {
    gauges: Mutex<HashMap<&'static str, GaugeFn>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value of a registered gauge.
    pub fn read_gauge(&self, name: &str) -> Option<u64> {
        let gauges = self.gauges.lock().expect("stats lock poisoned");
        gauges.get(name).map(|g| g())
    }
}

impl StatsProvider for InMemoryStats {
    fn make_gauge(&self, name: &'static str, supplier: GaugeFn) {
        self.gauges
            .lock()
            .expect("stats lock poisoned")
            .insert(name, supplier);
    }
}
