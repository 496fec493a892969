use std::error::Error;
use std::time::Duration;

use gattlib::advertisement_data::AdvertisementData;
use gattlib::eddystone::{EDDYSTONE_SERVICE, EddystoneFrame, EddystoneTypes};
use gattlib::platform::DiscoveredDevice;
use gattlib::simulated::Peripheral;
use gattlib::{Config, Gattlib};
use tracing::info;
use tracing::metadata::LevelFilter;

fn beacon(address: &str, frame: &[u8]) -> Peripheral {
    let mut advertisement_data = AdvertisementData::default();
    advertisement_data
        .service_data
        .insert(EDDYSTONE_SERVICE, frame.to_vec());
    Peripheral::new(address)
        .with_rssi(-70)
        .with_advertisement_data(advertisement_data)
}

fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let (gattlib, platform) = Gattlib::simulated(Config::from_env())?;
    let adapter_name = gattlib.config().default_adapter.clone();
    platform.add_peripheral(
        &adapter_name,
        beacon("C0:FF:EE:00:00:01", b"\x10\xeb\x03example\x07"),
    )?;
    platform.add_peripheral(
        &adapter_name,
        beacon(
            "C0:FF:EE:00:00:02",
            &[0x20, 0x00, 0x0b, 0xb8, 0x16, 0x00, 0, 0, 0x10, 0, 0, 0, 0x27, 0x10],
        ),
    )?;

    let adapter = gattlib.adapter_open(None)?;
    adapter.scan_eddystone(
        EddystoneTypes::all(),
        None,
        |device: &DiscoveredDevice, frame: &EddystoneFrame| match frame {
            EddystoneFrame::Url { url, tx_power } => {
                info!("{}: URL {url} (TX power {tx_power}dBm)", device.address)
            }
            EddystoneFrame::Tlm { battery_mv, .. } => {
                info!("{}: telemetry, battery at {battery_mv}mV", device.address)
            }
            frame => info!("{}: {:?}", device.address, frame.frame_type()),
        },
        Duration::from_millis(500),
    )?;
    info!("scan completed");

    adapter.close()?;
    gattlib.shutdown();
    Ok(())
}
