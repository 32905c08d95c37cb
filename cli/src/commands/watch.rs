use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use colored::Color;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use blewatch_core::backend::btle::BtleplugBackend;
use blewatch_core::watcher::{DeviceWatcher, WatcherEvent};

use crate::commands::WatchArgs;
use crate::terminal::print;

pub async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let watcher = build_session(&args).await?;

    let spinner = listening_spinner();
    attach_printer(&watcher, spinner.clone());

    watcher.start_listening()?;
    run_session(&watcher, args.linger).await;
    spinner.finish_and_clear();

    print::header("Discovered Devices");
    print::device_list(&watcher.discovered_devices());

    stop(watcher).await
}

/// Builds a watcher over the system adapter with the requested selector
/// and filter parameters. Shared with the `receive` front-end.
pub(crate) async fn build_session(args: &WatchArgs) -> anyhow::Result<DeviceWatcher> {
    ensure!(args.signal <= 0, "signal floor must be given in dB (<= 0)");

    let backend = BtleplugBackend::new().await?;
    let resolver = Arc::new(backend.clone());

    let watcher = DeviceWatcher::new(&backend, resolver, args.selector()?).await?;
    watcher.set_heartbeat_timeout(args.timeout);
    watcher.set_signal_filter(args.signal);
    Ok(watcher)
}

pub(crate) fn listening_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap()
            .tick_strings(&["▁▁▁", "▁▂▁", "▂▄▂", "▄▆▄", "▂▄▂", "▁▂▁"]),
    );
    spinner.set_message("listening, please wait");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub(crate) fn attach_printer(watcher: &DeviceWatcher, spinner: ProgressBar) {
    watcher.subscribe(move |event| match event {
        WatcherEvent::StartedListening => info!("listening started"),
        WatcherEvent::StoppedListening => info!("listening stopped"),
        WatcherEvent::EnumerationCompleted => info!("initial enumeration completed"),
        WatcherEvent::NewDeviceDiscovered(device) => {
            print::event_block(&spinner, "discovered", device, Color::Green);
        }
        WatcherEvent::DeviceUpdated(device) => {
            print::event_block(&spinner, "updated", device, Color::Blue);
        }
        WatcherEvent::DeviceTimeout(device) => {
            print::event_block(&spinner, "timed out", device, Color::Red);
        }
    });
}

/// Keeps the session alive until the initial enumeration has completed and
/// the linger window has elapsed, or the user interrupts.
pub(crate) async fn run_session(watcher: &DeviceWatcher, linger: u64) {
    let session = async {
        while !watcher.is_updated() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_secs(linger)).await;
    };

    tokio::select! {
        _ = session => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
}

/// Stops the watcher off the async workers; stopping blocks until the
/// backend has quiesced.
pub(crate) async fn stop(watcher: DeviceWatcher) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || watcher.stop_listening()).await?
}
