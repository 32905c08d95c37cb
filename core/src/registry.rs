//! # Discovery Registry
//!
//! Thread-safe mapping from device identifier to its record. All mutation
//! funnels through these methods, and snapshot reads copy out, so iteration
//! never observes concurrent mutation and never holds writers up for long.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use blewatch_common::device::{BleDevice, DeviceId};
use blewatch_common::properties::PropertyBag;

#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<DeviceId, BleDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, BleDevice>> {
        self.devices.lock().expect("device registry mutex poisoned")
    }

    /// Point-in-time copy of every tracked record.
    pub fn snapshot(&self) -> Vec<BleDevice> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.lock().contains_key(id)
    }

    /// Registers a freshly resolved record, keyed by its id. At most one
    /// record per id exists at any time; inserting an id that is already
    /// present replaces the old record.
    pub fn insert(&self, device: BleDevice) {
        self.lock().insert(device.id.clone(), device);
    }

    /// Bulk removal on session stop. Fires nothing.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Merges an update bag into the record for `id`. Returns a clone of
    /// the merged record iff the bag carried at least one usable field;
    /// `None` for an unknown id or an unusable bag.
    pub fn apply_update(
        &self,
        id: &DeviceId,
        properties: &PropertyBag,
        now: Instant,
    ) -> Option<BleDevice> {
        let mut devices = self.lock();
        let device = devices.get_mut(id)?;
        device.apply_update(properties, now).then(|| device.clone())
    }

    /// Heartbeat reaper pass: removes every record whose silence strictly
    /// exceeds `timeout` and returns the evicted records. A record exactly
    /// at the boundary survives. Purely in-memory.
    pub fn evict_stale(&self, timeout: Duration, now: Instant) -> Vec<BleDevice> {
        let mut devices = self.lock();
        let stale: Vec<DeviceId> = devices
            .iter()
            .filter(|(_, device)| now.duration_since(device.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        stale.iter().filter_map(|id| devices.remove(id)).collect()
    }
}
