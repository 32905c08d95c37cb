//! # Scan Session
//!
//! The stateful watcher that owns the discovery registry, applies the
//! signal-strength admission filter, evicts silent devices via the
//! heartbeat reaper and notifies observers, all under concurrent signal
//! delivery from the backend's worker threads.
//!
//! Locking discipline: a session-level signal mutex serialises the
//! mutate-then-notify section of every signal, so events for one device can
//! neither interleave nor reorder. The registry's own inner mutex alone
//! guards snapshot reads, which lets observers read back into the session
//! from inside a callback without deadlocking. Neither lock is ever held
//! across a backend call; device resolution in particular happens with no
//! lock held at all.

use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use blewatch_common::device::{BleDevice, DeviceId};
use blewatch_common::properties::{
    self, AdvertisementInfo, PropertyBag, PropertyKey, PropertyValue,
};
use blewatch_common::selector::DeviceSelector;

use crate::backend::{DeviceResolver, ScanBackend, ScanSink, ScanStatus, ScannerHandle};
use crate::registry::DeviceRegistry;

/// Default silence window after which a device is presumed gone.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
/// Default admission floor in dB.
pub const DEFAULT_SIGNAL_FILTER_DB: i16 = -70;

/// Lifecycle and discovery notifications delivered to observers.
///
/// Device-carrying variants hand out cloned snapshots; observers never see
/// the registry's own records and must not expect mutations to stick.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    StartedListening,
    StoppedListening,
    EnumerationCompleted,
    NewDeviceDiscovered(BleDevice),
    DeviceUpdated(BleDevice),
    DeviceTimeout(BleDevice),
}

type Observer = Arc<dyn Fn(&WatcherEvent) + Send + Sync>;

/// Admission filter: rejects only when a signal-strength field is present
/// and parses strictly below `floor_db`. Absent or unparseable strength is
/// no cause for rejection.
fn admitted(properties: &PropertyBag, floor_db: i16) -> bool {
    match properties
        .get(&PropertyKey::SignalStrength)
        .and_then(PropertyValue::as_db)
    {
        Some(signal) => signal >= floor_db,
        None => true,
    }
}

/// State shared between the session handle and the signal handler the
/// backend calls into.
struct WatcherShared {
    registry: DeviceRegistry,
    observers: Mutex<Vec<Observer>>,
    /// Serialises registry mutation plus the notifications it triggers.
    signal_order: Mutex<()>,
    heartbeat_timeout_secs: AtomicU64,
    signal_filter_db: AtomicI16,
    resolver: Arc<dyn DeviceResolver>,
}

impl WatcherShared {
    fn lock_signals(&self) -> MutexGuard<'_, ()> {
        self.signal_order.lock().expect("signal mutex poisoned")
    }

    fn emit(&self, event: WatcherEvent) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .expect("observer list poisoned")
            .clone();
        for observer in &observers {
            observer(&event);
        }
    }

    fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.load(Ordering::Relaxed))
    }

    fn signal_floor(&self) -> i16 {
        self.signal_filter_db.load(Ordering::Relaxed)
    }

    /// Heartbeat reaper pass plus one timeout notification per evicted
    /// record. Caller must hold the signal mutex.
    fn reap(&self, now: Instant) {
        for device in self.registry.evict_stale(self.heartbeat_timeout(), now) {
            self.emit(WatcherEvent::DeviceTimeout(device));
        }
    }

    /// Merge path shared by "changed" signals and the degraded branch of a
    /// raced first discovery. Caller must hold the signal mutex.
    fn merge_update(&self, id: &DeviceId, properties: &PropertyBag) {
        if let Some(merged) = self.registry.apply_update(id, properties, Instant::now()) {
            self.emit(WatcherEvent::DeviceUpdated(merged));
        }
    }
}

/// The backend-facing half of the session.
struct SignalHandler {
    shared: Arc<WatcherShared>,
}

impl ScanSink for SignalHandler {
    fn advertisement_found(&self, info: AdvertisementInfo) {
        let shared = &self.shared;

        let guard = shared.lock_signals();
        shared.reap(Instant::now());

        if !admitted(&info.properties, shared.signal_floor()) {
            debug!("advertisement from {} below signal floor, dropped", info.id);
            return;
        }

        // Known ids need no resolution; the bag alone carries the merge.
        if shared.registry.contains(&info.id) {
            shared.merge_update(&info.id, &info.properties);
            return;
        }

        // First discovery requires the full property triple; check before
        // paying for the external resolution call.
        let discovered = match properties::parse_discovery(&info.properties) {
            Ok(discovered) => discovered,
            Err(error) => {
                debug!("first advertisement from {} unusable: {error}", info.id);
                return;
            }
        };

        // Resolution may be slow; release the session so other deliveries
        // keep flowing while we wait on the backend.
        drop(guard);
        let resolved = match shared.resolver.resolve(&info) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                debug!("backend knows no device for {}, signal abandoned", info.id);
                return;
            }
            Err(error) => {
                warn!("device resolution failed for {}: {error}", info.id);
                return;
            }
        };

        let device = BleDevice {
            id: info.id.clone(),
            address: resolved.address,
            name: discovered.name,
            signal: discovered.signal,
            connected: discovered.connected,
            can_pair: resolved.can_pair,
            paired: resolved.paired,
            last_seen: Instant::now(),
        };

        let _guard = shared.lock_signals();
        if shared.registry.contains(&info.id) {
            // A concurrent delivery won the resolution race; this sighting
            // degrades to a merge.
            shared.merge_update(&info.id, &info.properties);
            return;
        }
        shared.registry.insert(device.clone());
        shared.emit(WatcherEvent::NewDeviceDiscovered(device));
    }

    fn advertisement_changed(&self, id: DeviceId, properties: PropertyBag) {
        let shared = &self.shared;

        let _guard = shared.lock_signals();
        shared.reap(Instant::now());

        if !admitted(&properties, shared.signal_floor()) {
            debug!("update from {id} below signal floor, dropped");
            return;
        }

        // Unknown ids fall through silently: nothing to merge into.
        shared.merge_update(&id, &properties);
    }

    fn enumeration_completed(&self) {
        let shared = &self.shared;

        let _guard = shared.lock_signals();
        shared.reap(Instant::now());
        shared.emit(WatcherEvent::EnumerationCompleted);
    }
}

/// A scanning session over one backend scanner.
///
/// Create it with a [`DeviceSelector`], subscribe observers, then drive it
/// with [`start_listening`](Self::start_listening) /
/// [`stop_listening`](Self::stop_listening). Both lifecycle calls are
/// idempotent.
pub struct DeviceWatcher {
    scanner: Box<dyn ScannerHandle>,
    shared: Arc<WatcherShared>,
}

impl DeviceWatcher {
    /// Builds a session scanning for devices matched by `selector`.
    ///
    /// Filter parameters start at their defaults (30s heartbeat, -70dB
    /// floor) and may be changed at any time, including mid-session.
    pub async fn new(
        backend: &dyn ScanBackend,
        resolver: Arc<dyn DeviceResolver>,
        selector: DeviceSelector,
    ) -> anyhow::Result<Self> {
        let scanner = backend
            .create_scanner(&selector, &PropertyKey::REQUESTED)
            .await?;

        Ok(Self {
            scanner,
            shared: Arc::new(WatcherShared {
                registry: DeviceRegistry::new(),
                observers: Mutex::new(Vec::new()),
                signal_order: Mutex::new(()),
                heartbeat_timeout_secs: AtomicU64::new(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
                signal_filter_db: AtomicI16::new(DEFAULT_SIGNAL_FILTER_DB),
                resolver,
            }),
        })
    }

    /// Registers an observer for all event kinds. Observers run inline on
    /// the delivering thread and should return quickly.
    pub fn subscribe(&self, observer: impl Fn(&WatcherEvent) + Send + Sync + 'static) {
        self.shared
            .observers
            .lock()
            .expect("observer list poisoned")
            .push(Arc::new(observer));
    }

    /// Maximum silence before a device is evicted, in whole seconds.
    /// Takes effect on the next processed signal; zero clamps to one.
    pub fn set_heartbeat_timeout(&self, secs: u64) {
        self.shared
            .heartbeat_timeout_secs
            .store(secs.max(1), Ordering::Relaxed);
    }

    /// Admission floor in dB; advertisements strictly below it are dropped.
    /// Takes effect on the next processed signal.
    pub fn set_signal_filter(&self, db: i16) {
        self.shared.signal_filter_db.store(db, Ordering::Relaxed);
    }

    pub fn is_listening(&self) -> bool {
        matches!(
            self.scanner.status(),
            ScanStatus::Started | ScanStatus::EnumerationCompleted
        )
    }

    /// Whether the backend has finished its initial enumeration sweep.
    pub fn is_updated(&self) -> bool {
        self.scanner.status() == ScanStatus::EnumerationCompleted
    }

    pub fn is_stopped(&self) -> bool {
        self.scanner.status() == ScanStatus::Stopped
    }

    /// Point-in-time snapshot of every tracked record.
    pub fn discovered_devices(&self) -> Vec<BleDevice> {
        self.shared.registry.snapshot()
    }

    pub fn devices_found(&self) -> bool {
        !self.shared.registry.is_empty()
    }

    /// Subscribes to the backend and starts the scan. A no-op while the
    /// session is already listening; only the call that actually starts
    /// the scan fires [`WatcherEvent::StartedListening`].
    pub fn start_listening(&self) -> anyhow::Result<()> {
        if self.is_listening() {
            return Ok(());
        }

        let sink: Arc<dyn ScanSink> = Arc::new(SignalHandler {
            shared: Arc::clone(&self.shared),
        });
        self.scanner.subscribe(sink);
        self.scanner.start()?;
        self.shared.emit(WatcherEvent::StartedListening);
        Ok(())
    }

    /// Halts the scan and clears the registry. A no-op when the session is
    /// already stopped or was never started.
    ///
    /// Blocks until the backend confirms it has quiesced. After that, no
    /// signal handler is in flight: [`WatcherEvent::StoppedListening`]
    /// fires exactly once and the registry is cleared in bulk, without
    /// per-device timeout events.
    pub fn stop_listening(&self) -> anyhow::Result<()> {
        if matches!(self.scanner.status(), ScanStatus::Idle | ScanStatus::Stopped) {
            return Ok(());
        }

        self.scanner.unsubscribe();
        self.scanner.stop()?;
        self.scanner.wait_until_stopped();
        self.shared.emit(WatcherEvent::StoppedListening);

        let _guard = self.shared.lock_signals();
        self.shared.registry.clear();
        Ok(())
    }
}
