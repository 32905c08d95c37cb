//! The central **abstraction** over the platform Bluetooth stack.
//!
//! This module defines the contract a radio scanning backend must implement
//! for a scan session to drive it, plus the remote-attribute access used to
//! resolve a full device at first discovery and to enumerate GATT services
//! on demand.
//!
//! **Architectural Note:**
//! High-level modules depend strictly on these traits rather than on a
//! concrete stack. The [`btle`] submodule provides the production adapter;
//! the integration suite substitutes a scripted one.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use blewatch_common::device::DeviceId;
use blewatch_common::properties::{AdvertisementInfo, PropertyBag, PropertyKey};
use blewatch_common::selector::DeviceSelector;

pub mod btle;

/// Lifecycle state reported by the scanning backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanStatus {
    /// Created but never started.
    #[default]
    Idle,
    /// Actively scanning; the initial sweep has not finished yet.
    Started,
    /// Actively scanning and the initial enumeration has completed.
    EnumerationCompleted,
    /// Halt requested, worker still winding down.
    Stopping,
    /// Fully quiesced; no further signals will be delivered.
    Stopped,
}

/// Receives discovery signals from the backend's worker context.
///
/// Implementations must tolerate concurrent invocation; the backend makes
/// no ordering promise between signals for different devices.
pub trait ScanSink: Send + Sync {
    /// A device not surfaced before in this scan matched the selector.
    fn advertisement_found(&self, info: AdvertisementInfo);
    /// Properties changed for a previously surfaced device.
    fn advertisement_changed(&self, id: DeviceId, properties: PropertyBag);
    /// The initial enumeration sweep finished.
    fn enumeration_completed(&self);
}

/// A live scanner owned by one scan session.
pub trait ScannerHandle: Send + Sync {
    /// Registers the sink that receives discovery signals.
    fn subscribe(&self, sink: Arc<dyn ScanSink>);
    /// Drops the sink registration; no new deliveries begin after this
    /// returns.
    fn unsubscribe(&self);
    /// Begins scanning.
    fn start(&self) -> anyhow::Result<()>;
    /// Requests a halt without waiting for the worker to quiesce.
    fn stop(&self) -> anyhow::Result<()>;
    /// Backend-reported lifecycle state.
    fn status(&self) -> ScanStatus;
    /// Blocks until the backend reports [`ScanStatus::Stopped`] (or was
    /// never started). Once this returns, no sink callback is running or
    /// will ever run again.
    fn wait_until_stopped(&self);
}

/// Factory for scanners, implemented by each radio scanning backend.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Creates a scanner surfacing only devices matched by `selector`,
    /// reporting the given property keys with every signal.
    async fn create_scanner(
        &self,
        selector: &DeviceSelector,
        keys: &[PropertyKey],
    ) -> anyhow::Result<Box<dyn ScannerHandle>>;
}

/// Device state resolved from the remote-attribute backend at first
/// discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub address: u64,
    pub can_pair: bool,
    pub paired: bool,
}

/// A GATT characteristic as enumerated by the remote-attribute backend.
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: Vec<String>,
}

/// A GATT service with its characteristics.
#[derive(Debug, Clone)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Remote-attribute access. Consulted by the session outside its locks;
/// calls here may be slow.
pub trait DeviceResolver: Send + Sync {
    /// Resolves the full device behind a first advertisement. `Ok(None)`
    /// means the backend knows no such device; both that and `Err` make
    /// the caller abandon the current signal.
    fn resolve(&self, info: &AdvertisementInfo) -> anyhow::Result<Option<ResolvedDevice>>;

    /// Enumerates the GATT services a discovered device exposes.
    fn gatt_services(&self, id: &DeviceId) -> anyhow::Result<Vec<GattService>>;
}
