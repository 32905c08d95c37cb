use blewatch_common::device::BleDevice;
use blewatch_core::backend::GattService;
use colored::*;
use indicatif::ProgressBar;

pub fn header(msg: &str) {
    println!("{}", format!("⟦ {msg} ⟧").bold());
}

/// Renders one device block in the colour of its lifecycle event, routed
/// through the spinner so the tick line stays at the bottom.
pub fn event_block(spinner: &ProgressBar, label: &str, device: &BleDevice, color: Color) {
    let block = format!("--- {label} ---\n{device}\n");
    spinner.println(block.color(color).to_string());
}

pub fn device_list(devices: &[BleDevice]) {
    if devices.is_empty() {
        println!("no devices found");
        return;
    }
    for device in devices {
        println!("{device}\n");
    }
}

pub fn gatt_tree(services: &[GattService]) {
    if services.is_empty() {
        println!("{}", "services not found".yellow());
        return;
    }

    println!("{}", "device services:".yellow());
    for service in services {
        println!("{}", format!("[{}]", service.uuid).red());
        if service.characteristics.is_empty() {
            println!("  {}", "no characteristics".dimmed());
            continue;
        }
        for (index, characteristic) in service.characteristics.iter().enumerate() {
            println!(
                "  {:02}. {}",
                index + 1,
                format!("[{}]", characteristic.uuid).green()
            );
            if !characteristic.properties.is_empty() {
                println!("      properties: {}", characteristic.properties.join(", "));
            }
        }
    }
    println!();
}
