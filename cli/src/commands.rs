pub mod receive;
pub mod watch;

use anyhow::ensure;
use clap::{Args, Parser, Subcommand};

use blewatch_common::selector::DeviceSelector;

#[derive(Parser)]
#[command(name = "blewatch")]
#[command(about = "Watch nearby Bluetooth Low Energy devices.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch nearby devices appear, update and time out
    #[command(alias = "w")]
    Watch(WatchArgs),
    /// Watch, then enumerate GATT services of everything discovered
    #[command(alias = "r")]
    Receive(WatchArgs),
}

#[derive(Args)]
pub struct WatchArgs {
    /// Heartbeat timeout in seconds before a silent device is evicted
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Signal strength floor in dB; weaker advertisements are dropped
    #[arg(long, default_value_t = -70, allow_hyphen_values = true)]
    pub signal: i16,

    /// Only surface devices whose name contains this substring
    #[arg(long, group = "selector")]
    pub name: Option<String>,

    /// Only surface the device with this address (aa:bb:cc:dd:ee:ff)
    #[arg(long, group = "selector")]
    pub address: Option<String>,

    /// Only surface devices with this pairing state
    #[arg(long, group = "selector")]
    pub paired: Option<bool>,

    /// Only surface devices with this connection state
    #[arg(long, group = "selector")]
    pub connected: Option<bool>,

    /// How long to keep listening after the initial enumeration, in seconds
    #[arg(long, default_value_t = 15)]
    pub linger: u64,
}

impl WatchArgs {
    pub fn selector(&self) -> anyhow::Result<DeviceSelector> {
        if let Some(name) = &self.name {
            return Ok(DeviceSelector::ByName(name.clone()));
        }
        if let Some(address) = &self.address {
            return Ok(DeviceSelector::ByAddress(parse_address(address)?));
        }
        if let Some(paired) = self.paired {
            return Ok(DeviceSelector::ByPairingState(paired));
        }
        if let Some(connected) = self.connected {
            return Ok(DeviceSelector::ByConnectionState(connected));
        }
        // Hunting for unpaired devices is the default.
        Ok(DeviceSelector::ByPairingState(false))
    }
}

fn parse_address(address: &str) -> anyhow::Result<u64> {
    let bytes: Vec<u8> = address
        .split(':')
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<Result<_, _>>()?;
    ensure!(bytes.len() == 6, "invalid device address: {address}");
    Ok(bytes.into_iter().fold(0, |acc, byte| (acc << 8) | u64::from(byte)))
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
