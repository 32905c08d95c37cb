//! Production scanning backend over `btleplug`.
//!
//! `btleplug` exposes an async, pull-style API (start a scan, then ask the
//! adapter for its current peripherals), while the watcher expects a
//! push-style worker delivering signals. The adapter bridges the two with a
//! dedicated sweep thread: each sweep diffs the adapter's peripheral list
//! against what it has already surfaced, routing first sightings to
//! `advertisement_found` and everything else to `advertisement_changed`.
//! All async calls run through a captured runtime [`Handle`], one
//! `block_on` per call, so sink callbacks always happen from a plain
//! worker thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::runtime::Handle;
use tracing::warn;

use blewatch_common::device::DeviceId;
use blewatch_common::properties::{AdvertisementInfo, PropertyBag, PropertyKey, PropertyValue};
use blewatch_common::selector::DeviceSelector;

use super::{
    DeviceResolver, GattCharacteristic, GattService, ResolvedDevice, ScanBackend, ScanSink,
    ScanStatus, ScannerHandle,
};

const SWEEP_INTERVAL: Duration = Duration::from_millis(1_000);

/// Scanning and remote-attribute backend bound to the first system
/// Bluetooth adapter.
#[derive(Clone)]
pub struct BtleplugBackend {
    adapter: Adapter,
    runtime: Handle,
}

impl BtleplugBackend {
    /// Binds to the first Bluetooth adapter on the system.
    ///
    /// Must be called from within a tokio runtime; the captured handle
    /// drives all later backend I/O from the scanner's worker thread.
    pub async fn new() -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no Bluetooth adapter available"))?;

        Ok(Self {
            adapter,
            runtime: Handle::current(),
        })
    }
}

#[async_trait::async_trait]
impl ScanBackend for BtleplugBackend {
    async fn create_scanner(
        &self,
        selector: &DeviceSelector,
        _keys: &[PropertyKey],
    ) -> anyhow::Result<Box<dyn ScannerHandle>> {
        // btleplug reports full peripheral properties regardless of the
        // requested key set, so the keys need no translation here.
        Ok(Box::new(BtleplugScanner {
            adapter: self.adapter.clone(),
            runtime: self.runtime.clone(),
            selector: selector.clone(),
            state: Arc::new(ScannerState::default()),
        }))
    }
}

impl DeviceResolver for BtleplugBackend {
    fn resolve(&self, info: &AdvertisementInfo) -> anyhow::Result<Option<ResolvedDevice>> {
        let adapter = self.adapter.clone();
        let id = info.id.clone();
        self.runtime.clone().block_on(async move {
            let Some(peripheral) = find_peripheral(&adapter, &id).await? else {
                return Ok(None);
            };

            Ok(Some(ResolvedDevice {
                address: address_to_u64(peripheral.address()),
                // btleplug does not surface pairing state.
                can_pair: false,
                paired: false,
            }))
        })
    }

    fn gatt_services(&self, id: &DeviceId) -> anyhow::Result<Vec<GattService>> {
        let adapter = self.adapter.clone();
        let id = id.clone();
        self.runtime.clone().block_on(async move {
            let Some(peripheral) = find_peripheral(&adapter, &id).await? else {
                anyhow::bail!("device {id} is no longer visible");
            };

            if !peripheral.is_connected().await? {
                peripheral.connect().await?;
            }
            peripheral.discover_services().await?;

            let services = peripheral
                .services()
                .into_iter()
                .map(|service| GattService {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .into_iter()
                        .map(|characteristic| GattCharacteristic {
                            uuid: characteristic.uuid,
                            properties: flag_names(characteristic.properties),
                        })
                        .collect(),
                })
                .collect();
            Ok(services)
        })
    }
}

#[derive(Default)]
struct ScannerState {
    status: Mutex<ScanStatus>,
    stopped: Condvar,
    sink: Mutex<Option<Arc<dyn ScanSink>>>,
    halt: AtomicBool,
}

impl ScannerState {
    fn sink(&self) -> Option<Arc<dyn ScanSink>> {
        self.sink.lock().expect("sink slot poisoned").clone()
    }

    fn status(&self) -> ScanStatus {
        *self.status.lock().expect("status poisoned")
    }

    fn enumeration_done(&self) {
        let mut status = self.status.lock().expect("status poisoned");
        if *status == ScanStatus::Started {
            *status = ScanStatus::EnumerationCompleted;
        }
    }

    fn finish(&self) {
        *self.status.lock().expect("status poisoned") = ScanStatus::Stopped;
        self.stopped.notify_all();
    }
}

/// One live scan over the system adapter.
pub struct BtleplugScanner {
    adapter: Adapter,
    runtime: Handle,
    selector: DeviceSelector,
    state: Arc<ScannerState>,
}

impl ScannerHandle for BtleplugScanner {
    fn subscribe(&self, sink: Arc<dyn ScanSink>) {
        *self.state.sink.lock().expect("sink slot poisoned") = Some(sink);
    }

    fn unsubscribe(&self) {
        self.state.sink.lock().expect("sink slot poisoned").take();
    }

    fn start(&self) -> anyhow::Result<()> {
        {
            let mut status = self.state.status.lock().expect("status poisoned");
            if !matches!(*status, ScanStatus::Idle | ScanStatus::Stopped) {
                return Ok(());
            }
            *status = ScanStatus::Started;
        }
        self.state.halt.store(false, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        let runtime = self.runtime.clone();
        let selector = self.selector.clone();
        let state = Arc::clone(&self.state);
        thread::Builder::new()
            .name("blewatch-scan".into())
            .spawn(move || run_scan_worker(adapter, runtime, selector, state))?;
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let mut status = self.state.status.lock().expect("status poisoned");
        if matches!(
            *status,
            ScanStatus::Started | ScanStatus::EnumerationCompleted
        ) {
            *status = ScanStatus::Stopping;
            self.state.halt.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn status(&self) -> ScanStatus {
        self.state.status()
    }

    fn wait_until_stopped(&self) {
        let mut status = self.state.status.lock().expect("status poisoned");
        while !matches!(*status, ScanStatus::Stopped | ScanStatus::Idle) {
            status = self
                .state
                .stopped
                .wait(status)
                .expect("status poisoned");
        }
    }
}

fn run_scan_worker(
    adapter: Adapter,
    runtime: Handle,
    selector: DeviceSelector,
    state: Arc<ScannerState>,
) {
    if let Err(error) = runtime.block_on(adapter.start_scan(ScanFilter::default())) {
        warn!("failed to start platform scan: {error}");
        state.finish();
        return;
    }

    let mut seen: HashSet<DeviceId> = HashSet::new();
    let mut enumerated = false;

    while !state.halt.load(Ordering::SeqCst) {
        thread::sleep(SWEEP_INTERVAL);
        if state.halt.load(Ordering::SeqCst) {
            break;
        }

        sweep(&adapter, &runtime, &selector, &state, &mut seen);

        if !enumerated {
            enumerated = true;
            state.enumeration_done();
            if let Some(sink) = state.sink() {
                sink.enumeration_completed();
            }
        }
    }

    if let Err(error) = runtime.block_on(adapter.stop_scan()) {
        warn!("failed to stop platform scan: {error}");
    }
    state.finish();
}

fn sweep(
    adapter: &Adapter,
    runtime: &Handle,
    selector: &DeviceSelector,
    state: &ScannerState,
    seen: &mut HashSet<DeviceId>,
) {
    let peripherals = match runtime.block_on(adapter.peripherals()) {
        Ok(peripherals) => peripherals,
        Err(error) => {
            warn!("peripheral sweep failed: {error}");
            return;
        }
    };

    for peripheral in peripherals {
        let Some(sink) = state.sink() else { return };

        let properties = match runtime.block_on(peripheral.properties()) {
            Ok(Some(properties)) => properties,
            _ => continue,
        };
        let connected = runtime.block_on(peripheral.is_connected()).unwrap_or(false);

        // The hardware address doubles as the backend-stable identifier.
        let address = address_to_u64(properties.address);
        let id = DeviceId::from(properties.address.to_string());

        let name = properties.local_name.as_deref().unwrap_or("");
        // Pairing state is unknown here, treated as unpaired.
        if !selector.matches(name, address, false, connected) {
            continue;
        }

        let mut bag = PropertyBag::new();
        if let Some(local_name) = &properties.local_name {
            bag.insert(PropertyKey::Name, PropertyValue::Text(local_name.clone()));
        }
        bag.insert(PropertyKey::IsConnected, PropertyValue::Bool(connected));
        if let Some(rssi) = properties.rssi {
            bag.insert(PropertyKey::SignalStrength, PropertyValue::Signed(rssi.into()));
        }

        if seen.contains(&id) {
            sink.advertisement_changed(id, bag);
        } else if properties.rssi.is_some() {
            // Hold the first sighting back until an RSSI sample exists;
            // discovery needs the full property triple.
            seen.insert(id.clone());
            sink.advertisement_found(AdvertisementInfo {
                id,
                properties: bag,
            });
        }
    }
}

async fn find_peripheral(adapter: &Adapter, id: &DeviceId) -> anyhow::Result<Option<Peripheral>> {
    let peripherals = adapter.peripherals().await?;
    Ok(peripherals
        .into_iter()
        .find(|peripheral| peripheral.address().to_string() == id.as_str()))
}

fn address_to_u64(address: btleplug::api::BDAddr) -> u64 {
    address
        .into_inner()
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn flag_names(flags: CharPropFlags) -> Vec<String> {
    const NAMES: &[(CharPropFlags, &str)] = &[
        (CharPropFlags::BROADCAST, "BROADCAST"),
        (CharPropFlags::READ, "READ"),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, "WRITE_WITHOUT_RESPONSE"),
        (CharPropFlags::WRITE, "WRITE"),
        (CharPropFlags::NOTIFY, "NOTIFY"),
        (CharPropFlags::INDICATE, "INDICATE"),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            "AUTHENTICATED_SIGNED_WRITES",
        ),
        (CharPropFlags::EXTENDED_PROPERTIES, "EXTENDED_PROPERTIES"),
    ];

    NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| (*name).to_string())
        .collect()
}
