use std::error::Error;
use std::time::Duration;

use btuuid::BluetoothUuid;
use futures_lite::StreamExt;
use gattlib_async::simulated::{Peripheral, SimCharacteristic, SimService};
use gattlib_async::{
    AdapterAsync, CharacteristicProperties, Config, ConnectOptions, DiscoveryFilter, Gattlib,
    SubscriptionKind,
};
use tracing::info;
use tracing::metadata::LevelFilter;

const HEART_RATE: BluetoothUuid = BluetoothUuid::from_u16(0x180d);
const MEASUREMENT: BluetoothUuid = BluetoothUuid::from_u16(0x2a37);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
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
        Peripheral::new("AA:BB:CC:DD:EE:FF")
            .with_name("Heart Rate Sensor")
            .with_rssi(-58)
            .with_service(
                SimService::new(HEART_RATE).with_characteristic(SimCharacteristic::new(
                    MEASUREMENT,
                    CharacteristicProperties::NOTIFY,
                )),
            ),
    )?;

    let adapter = AdapterAsync::open(&gattlib, None)?;

    info!("starting scan");
    let mut scan = adapter.scan(
        DiscoveryFilter::default().with_uuids([HEART_RATE]),
        Duration::from_secs(2),
    )?;
    let Some(device) = scan.next().await else {
        info!("nothing found");
        return Ok(());
    };
    drop(scan);
    info!(
        "{} ({}): {:?}",
        device.name.as_deref().unwrap_or("(unknown)"),
        device.address,
        device.advertisement_data
    );

    let connection = adapter
        .connect(&device.address, ConnectOptions::default())
        .await?;
    let mut notifications = connection.notifications();
    connection
        .subscribe(&MEASUREMENT, SubscriptionKind::Notification)
        .await?;

    for bpm in [72u8, 75, 71] {
        platform.notify(&adapter_name, &device.address, &MEASUREMENT, &[0, bpm])?;
    }
    for _ in 0..3 {
        match notifications.next().await {
            Some(notification) => info!("{}: {:02x?}", notification.kind, notification.value),
            None => break,
        }
    }

    connection.disconnect().await?;
    adapter.into_inner().close()?;
    gattlib.shutdown();
    Ok(())
}
