//! # Device Selector Strategies
//!
//! The criterion deciding which backend-visible devices a scan session
//! surfaces: a single tagged variant consumed by the backend factory,
//! covering name, address, pairing state, connection state and appearance
//! selection.

use crate::device::format_address;

/// GAP appearance category of a peripheral (16-bit assigned number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appearance(pub u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Match on a display-name substring.
    ByName(String),
    /// Match one specific 48-bit hardware address.
    ByAddress(u64),
    /// Surface only paired (or only unpaired) devices.
    ByPairingState(bool),
    /// Surface only connected (or only disconnected) devices.
    ByConnectionState(bool),
    /// Match a GAP appearance category.
    ByAppearance(Appearance),
}

impl DeviceSelector {
    /// Builds the backend query string for this strategy.
    pub fn query(&self) -> String {
        match self {
            DeviceSelector::ByName(name) => format!("name:{name}"),
            DeviceSelector::ByAddress(address) => {
                format!("address:{}", format_address(*address))
            }
            DeviceSelector::ByPairingState(paired) => format!("paired:{paired}"),
            DeviceSelector::ByConnectionState(connected) => format!("connected:{connected}"),
            DeviceSelector::ByAppearance(appearance) => {
                format!("appearance:{:#06x}", appearance.0)
            }
        }
    }

    /// Whether a device with the given attributes passes this strategy.
    ///
    /// Used by backends that can only post-filter a raw scan. Appearance
    /// is not knowable from a raw sweep, so that strategy admits all.
    pub fn matches(&self, name: &str, address: u64, paired: bool, connected: bool) -> bool {
        match self {
            DeviceSelector::ByName(substring) => name.contains(substring.as_str()),
            DeviceSelector::ByAddress(wanted) => *wanted == address,
            DeviceSelector::ByPairingState(wanted) => *wanted == paired,
            DeviceSelector::ByConnectionState(wanted) => *wanted == connected,
            DeviceSelector::ByAppearance(_) => true,
        }
    }
}
