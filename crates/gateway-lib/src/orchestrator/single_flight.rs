//! Per-key in-flight flags

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// At most one holder per key at a time
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<DashMap<String, ()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if someone already holds it
    ///
    /// Check and set happen under one shard lock.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(FlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.to_string(),
                })
            }
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }
}

/// Releases its key when dropped, including on error and cancellation
#[derive(Debug)]
pub struct FlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
