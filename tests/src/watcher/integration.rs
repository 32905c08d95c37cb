#![cfg(test)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blewatch_common::device::DeviceId;
use blewatch_common::properties::{AdvertisementInfo, PropertyBag, PropertyKey, PropertyValue};
use blewatch_common::selector::DeviceSelector;
use blewatch_core::watcher::{DeviceWatcher, WatcherEvent};

use crate::mock::{EventLog, ScriptedBackend, ScriptedResolver};

fn bag(name: Option<&str>, connected: Option<bool>, signal: Option<i16>) -> PropertyBag {
    let mut bag = PropertyBag::new();
    if let Some(name) = name {
        bag.insert(PropertyKey::Name, PropertyValue::Text(name.to_string()));
    }
    if let Some(connected) = connected {
        bag.insert(PropertyKey::IsConnected, PropertyValue::Bool(connected));
    }
    if let Some(signal) = signal {
        bag.insert(PropertyKey::SignalStrength, PropertyValue::Signed(signal.into()));
    }
    bag
}

fn advert(id: &str, name: &str, signal: i16) -> AdvertisementInfo {
    AdvertisementInfo {
        id: DeviceId::from(id),
        properties: bag(Some(name), Some(false), Some(signal)),
    }
}

/// A started session over scripted backends, with an event log attached.
async fn session() -> (
    DeviceWatcher,
    ScriptedBackend,
    Arc<ScriptedResolver>,
    Arc<EventLog>,
) {
    let backend = ScriptedBackend::new();
    let resolver = ScriptedResolver::new();
    let watcher = DeviceWatcher::new(
        &backend,
        resolver.clone(),
        DeviceSelector::ByPairingState(false),
    )
    .await
    .expect("scripted backend never fails to create a scanner");

    let log = EventLog::new();
    watcher.subscribe(log.recorder());
    watcher.start_listening().unwrap();

    (watcher, backend, resolver, log)
}

fn new_device_count(log: &EventLog) -> usize {
    log.count(|e| matches!(e, WatcherEvent::NewDeviceDiscovered(_)))
}

fn timeout_count(log: &EventLog) -> usize {
    log.count(|e| matches!(e, WatcherEvent::DeviceTimeout(_)))
}

#[tokio::test]
async fn accepted_advertisement_discovers_the_device() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0x0000_0000_00aa);

    backend.deliver_found(advert("A", "gizmo", -60));

    let discovered: Vec<_> = log
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            WatcherEvent::NewDeviceDiscovered(device) => Some(device),
            _ => None,
        })
        .collect();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].name, "gizmo");
    assert_eq!(discovered[0].signal, -60);
    assert_eq!(discovered[0].address, 0xaa);
    assert!(!discovered[0].connected);

    assert!(watcher.devices_found());
    assert_eq!(watcher.discovered_devices().len(), 1);
}

#[tokio::test]
async fn weak_advertisement_is_rejected_before_resolution() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("B", 0xbb);

    backend.deliver_found(advert("B", "faint", -80));

    assert!(watcher.discovered_devices().is_empty());
    assert!(log.snapshot().iter().all(|e| matches!(
        e,
        WatcherEvent::StartedListening
    )));
    assert_eq!(resolver.resolve_calls(), 0, "rejected signals must not resolve");
}

#[tokio::test]
async fn filter_boundary_is_inclusive() {
    let (watcher, backend, resolver, _log) = session().await;
    resolver.register("edge", 0x01);
    resolver.register("below", 0x02);

    backend.deliver_found(advert("edge", "edge", -70));
    backend.deliver_found(advert("below", "below", -71));

    let ids: Vec<_> = watcher.discovered_devices().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![DeviceId::from("edge")]);
}

#[tokio::test]
async fn update_merges_fields_and_advances_last_seen() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);

    backend.deliver_found(advert("A", "gizmo", -60));
    let before = watcher.discovered_devices()[0].last_seen;

    backend.deliver_changed(DeviceId::from("A"), bag(None, None, Some(-65)));

    let updated: Vec<_> = log
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            WatcherEvent::DeviceUpdated(device) => Some(device),
            _ => None,
        })
        .collect();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].signal, -65);
    assert_eq!(updated[0].name, "gizmo", "untouched fields must survive the merge");
    assert!(updated[0].last_seen >= before);

    assert_eq!(watcher.discovered_devices()[0].signal, -65);
}

#[tokio::test]
async fn unusable_update_fires_nothing() {
    let (_watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    backend.deliver_found(advert("A", "gizmo", -60));

    backend.deliver_changed(DeviceId::from("A"), PropertyBag::new());
    let mut garbled = PropertyBag::new();
    garbled.insert(
        PropertyKey::SignalStrength,
        PropertyValue::Text("loud".into()),
    );
    backend.deliver_changed(DeviceId::from("A"), garbled);

    assert_eq!(log.count(|e| matches!(e, WatcherEvent::DeviceUpdated(_))), 0);
}

#[tokio::test]
async fn malformed_field_is_skipped_within_a_usable_update() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    backend.deliver_found(advert("A", "gizmo", -60));

    let mut mixed = PropertyBag::new();
    mixed.insert(
        PropertyKey::SignalStrength,
        PropertyValue::Text("loud".into()),
    );
    mixed.insert(PropertyKey::IsConnected, PropertyValue::Bool(true));
    backend.deliver_changed(DeviceId::from("A"), mixed);

    assert_eq!(log.count(|e| matches!(e, WatcherEvent::DeviceUpdated(_))), 1);
    let device = &watcher.discovered_devices()[0];
    assert!(device.connected);
    assert_eq!(device.signal, -60, "malformed strength must not clobber");
}

#[tokio::test]
async fn update_for_unknown_id_is_silently_ignored() {
    let (watcher, backend, _resolver, log) = session().await;

    backend.deliver_changed(DeviceId::from("ghost"), bag(None, None, Some(-40)));

    assert!(watcher.discovered_devices().is_empty());
    assert_eq!(log.count(|e| matches!(e, WatcherEvent::DeviceUpdated(_))), 0);
}

#[tokio::test]
async fn repeated_found_signals_never_duplicate_a_record() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);

    backend.deliver_found(advert("A", "gizmo", -60));
    backend.deliver_found(advert("A", "gizmo", -61));

    assert_eq!(watcher.discovered_devices().len(), 1);
    assert_eq!(new_device_count(&log), 1);
    // The second sighting degrades to a merge.
    assert_eq!(log.count(|e| matches!(e, WatcherEvent::DeviceUpdated(_))), 1);
}

#[tokio::test]
async fn resolution_failure_abandons_the_signal() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    resolver.set_failing(true);

    backend.deliver_found(advert("A", "gizmo", -60));

    assert!(watcher.discovered_devices().is_empty());
    assert_eq!(new_device_count(&log), 0);

    // The backend recovers; the next sighting discovers normally.
    resolver.set_failing(false);
    backend.deliver_found(advert("A", "gizmo", -60));
    assert_eq!(new_device_count(&log), 1);
}

#[tokio::test]
async fn unresolvable_device_abandons_the_signal() {
    let (watcher, backend, _resolver, log) = session().await;

    backend.deliver_found(advert("unregistered", "mystery", -50));

    assert!(watcher.discovered_devices().is_empty());
    assert_eq!(new_device_count(&log), 0);
}

#[tokio::test]
async fn incomplete_first_discovery_is_fatal_for_that_signal() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);

    // No signal-strength field: passes the filter, fails translation.
    backend.deliver_found(AdvertisementInfo {
        id: DeviceId::from("A"),
        properties: bag(Some("gizmo"), Some(false), None),
    });

    assert!(watcher.discovered_devices().is_empty());
    assert_eq!(new_device_count(&log), 0);
    assert_eq!(resolver.resolve_calls(), 0);
}

#[tokio::test]
async fn silent_device_is_evicted_by_unrelated_traffic() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    resolver.register("B", 0xbb);
    watcher.set_heartbeat_timeout(1);

    backend.deliver_found(advert("A", "gizmo", -60));
    thread::sleep(Duration::from_millis(1_200));

    // Any processed signal runs the reaper first, even one for another id.
    backend.deliver_found(advert("B", "other", -55));

    assert_eq!(timeout_count(&log), 1);
    let ids: Vec<_> = watcher.discovered_devices().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![DeviceId::from("B")]);

    // Further unrelated traffic must not resurrect the evicted id.
    backend.deliver_changed(DeviceId::from("B"), bag(None, None, Some(-56)));
    assert!(!watcher
        .discovered_devices()
        .iter()
        .any(|d| d.id == DeviceId::from("A")));
    assert_eq!(timeout_count(&log), 1);
}

#[tokio::test]
async fn enumeration_signal_reaps_then_notifies() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    watcher.set_heartbeat_timeout(1);

    backend.deliver_found(advert("A", "gizmo", -60));
    thread::sleep(Duration::from_millis(1_200));

    backend.complete_enumeration();
    assert!(watcher.is_updated());

    let events = log.snapshot();
    let timeout_at = events
        .iter()
        .position(|e| matches!(e, WatcherEvent::DeviceTimeout(_)))
        .expect("stale device must be reaped");
    let enumeration_at = events
        .iter()
        .position(|e| matches!(e, WatcherEvent::EnumerationCompleted))
        .expect("enumeration event must fire");
    assert!(timeout_at < enumeration_at);
}

#[tokio::test]
async fn start_is_idempotent() {
    let (watcher, _backend, _resolver, log) = session().await;

    watcher.start_listening().unwrap();
    watcher.start_listening().unwrap();

    assert_eq!(log.count(|e| matches!(e, WatcherEvent::StartedListening)), 1);
}

#[tokio::test]
async fn stop_clears_in_bulk_without_timeout_events() {
    let (watcher, backend, resolver, log) = session().await;
    for (id, address) in [("A", 0xaa_u64), ("B", 0xbb), ("C", 0xcc)] {
        resolver.register(id, address);
        backend.deliver_found(advert(id, id, -50));
    }
    assert_eq!(watcher.discovered_devices().len(), 3);

    watcher.stop_listening().unwrap();
    watcher.stop_listening().unwrap();

    assert_eq!(log.count(|e| matches!(e, WatcherEvent::StoppedListening)), 1);
    assert!(watcher.discovered_devices().is_empty());
    assert!(watcher.is_stopped());
    assert_eq!(timeout_count(&log), 0);
    assert!(!backend.subscribed(), "stop must unsubscribe before clearing");
}

#[tokio::test]
async fn signals_after_stop_are_dropped() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);
    watcher.stop_listening().unwrap();

    backend.deliver_found(advert("A", "gizmo", -60));

    assert!(watcher.discovered_devices().is_empty());
    assert_eq!(new_device_count(&log), 0);
}

#[tokio::test]
async fn filter_changes_apply_to_the_next_signal() {
    let (watcher, backend, resolver, _log) = session().await;
    resolver.register("A", 0xaa);
    resolver.register("B", 0xbb);

    backend.deliver_found(advert("A", "gizmo", -65));
    watcher.set_signal_filter(-60);
    backend.deliver_found(advert("B", "other", -65));

    let ids: Vec<_> = watcher.discovered_devices().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![DeviceId::from("A")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_deliveries_for_one_id_yield_one_record() {
    let (watcher, backend, resolver, log) = session().await;
    resolver.register("A", 0xaa);

    let threads: Vec<_> = (0..4)
        .map(|i| {
            let backend = backend.clone();
            thread::spawn(move || {
                backend.deliver_found(advert("A", "gizmo", -50 - i));
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    assert_eq!(watcher.discovered_devices().len(), 1);
    assert_eq!(new_device_count(&log), 1);
    let merges = log.count(|e| matches!(e, WatcherEvent::DeviceUpdated(_)));
    assert_eq!(merges, 3, "losing deliveries must degrade to merges");
}

#[tokio::test]
async fn watcher_passes_its_selector_to_the_backend() {
    let backend = ScriptedBackend::new();
    let resolver = ScriptedResolver::new();
    let selector = DeviceSelector::ByName("beacon".into());
    let _watcher = DeviceWatcher::new(&backend, resolver, selector.clone())
        .await
        .unwrap();

    assert_eq!(backend.selector(), Some(selector));
}
