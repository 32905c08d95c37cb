use std::sync::Arc;

use tracing::warn;

use blewatch_core::backend::DeviceResolver;
use blewatch_core::backend::btle::BtleplugBackend;

use crate::commands::WatchArgs;
use crate::commands::watch;
use crate::terminal::print;

/// Watches like `watch`, then walks every discovered device and prints its
/// GATT services and characteristics.
pub async fn receive(args: WatchArgs) -> anyhow::Result<()> {
    let linger = args.linger;
    let watcher = watch::build_session(&args).await?;

    let spinner = watch::listening_spinner();
    watch::attach_printer(&watcher, spinner.clone());

    watcher.start_listening()?;
    watch::run_session(&watcher, linger).await;
    spinner.finish_and_clear();

    let devices = watcher.discovered_devices();
    print::header("Discovered Devices");

    // GATT enumeration needs its own resolver; the watcher keeps hold of
    // the one it was built with.
    let resolver = Arc::new(BtleplugBackend::new().await?);
    for device in &devices {
        println!("{device}\n");

        let walker = Arc::clone(&resolver);
        let id = device.id.clone();
        match tokio::task::spawn_blocking(move || walker.gatt_services(&id)).await? {
            Ok(services) => print::gatt_tree(&services),
            Err(error) => warn!("service walk failed for {}: {error}", device.id),
        }
    }

    if devices.is_empty() {
        print::device_list(&devices);
    }

    watch::stop(watcher).await
}
