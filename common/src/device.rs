//! # Device Record
//!
//! One discovered peripheral as the watcher tracks it: immutable identity
//! (`id`, `address`) plus the liveness fields that get merged in place on
//! every accepted advertisement.

use std::fmt;
use std::time::Instant;

use crate::properties::{PropertyBag, PropertyKey, PropertyValue};

/// Display name used when a peripheral does not advertise one.
pub const NO_NAME: &str = "NO NAME";

/// Stable identifier for a discovered device, assigned by the scanning backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a 48-bit hardware address as colon separated hex pairs.
pub fn format_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]
    )
}

/// One peripheral currently believed visible.
///
/// Records are owned by the discovery registry; everything handed to
/// observers is a clone, never a reference into the registry.
#[derive(Debug, Clone)]
pub struct BleDevice {
    pub id: DeviceId,
    /// 48-bit hardware address, fixed at creation.
    pub address: u64,
    pub name: String,
    /// Most recent RSSI sample in dB.
    pub signal: i16,
    pub connected: bool,
    pub can_pair: bool,
    pub paired: bool,
    /// Advances on creation and on every applied merge, never backwards
    /// while the record stays registered.
    pub last_seen: Instant,
}

impl BleDevice {
    /// Merges an update bag into this record.
    ///
    /// Every recognised field that is present and parseable is applied;
    /// absent or malformed fields leave their attribute untouched. Returns
    /// `true` and advances `last_seen` iff at least one field applied.
    pub fn apply_update(&mut self, properties: &PropertyBag, now: Instant) -> bool {
        let mut applied = false;

        if let Some(value) = properties.get(&PropertyKey::Name) {
            self.name = value.as_text().unwrap_or(NO_NAME).to_string();
            applied = true;
        }

        if let Some(connected) = properties
            .get(&PropertyKey::IsConnected)
            .and_then(PropertyValue::as_bool)
        {
            self.connected = connected;
            applied = true;
        }

        if let Some(signal) = properties
            .get(&PropertyKey::SignalStrength)
            .and_then(PropertyValue::as_db)
        {
            self.signal = signal;
            applied = true;
        }

        if applied {
            self.last_seen = now;
        }
        applied
    }
}

impl fmt::Display for BleDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device Name:\t{}", self.name)?;
        writeln!(f, "Device Id:\t{}", self.id)?;
        writeln!(f, "Address:\t{}", format_address(self.address))?;
        writeln!(f, "Connected:\t{}", self.connected)?;
        writeln!(f, "Can Pair:\t{}", self.can_pair)?;
        writeln!(f, "Paired:\t\t{}", self.paired)?;
        write!(f, "Signal:\t\t{}dB", self.signal)
    }
}
