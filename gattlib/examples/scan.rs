use std::error::Error;
use std::sync::mpsc;
use std::time::Duration;

use btuuid::BluetoothUuid;
use gattlib::platform::DiscoveredDevice;
use gattlib::simulated::{Peripheral, SimCharacteristic, SimService};
use gattlib::uuid::to_string;
use gattlib::{CharacteristicProperties, Config, ConnectOptions, DiscoveryFilter, Gattlib};
use tracing::info;
use tracing::metadata::LevelFilter;

const HEART_RATE: BluetoothUuid = BluetoothUuid::from_u16(0x180d);
const MEASUREMENT: BluetoothUuid = BluetoothUuid::from_u16(0x2a37);

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
    platform.add_peripheral(
        &adapter_name,
        Peripheral::new("11:22:33:44:55:66").with_rssi(-91),
    )?;

    gattlib.mainloop(move |instance| -> gattlib::Result<()> {
        let adapter = instance.adapter_open(None)?;

        info!("scanning on {}", adapter.id());
        adapter.scan_enable(
            |device: &DiscoveredDevice| {
                info!(
                    "{} ({}): {}",
                    device.address,
                    device.rssi.map_or("?".to_owned(), |rssi| format!("{rssi}dBm")),
                    device.name.as_deref().unwrap_or("(unknown)"),
                );
            },
            Duration::from_millis(500),
            DiscoveryFilter::default(),
        )?;

        let connection = adapter.connect_sync("AA:BB:CC:DD:EE:FF", ConnectOptions::default())?;
        for service in connection.discover_primary_services()? {
            info!("service {} at {}", to_string(&service.uuid), service.handles);
        }

        let (sender, receiver) = mpsc::channel();
        connection.register_notification_handler(move |uuid: &BluetoothUuid, value: &[u8]| {
            info!("{}: {value:02x?}", to_string(uuid));
            let _ = sender.send(());
        })?;
        connection.notification_start(&MEASUREMENT)?;
        for bpm in [72u8, 75, 71] {
            platform.notify(adapter.name(), connection.address(), &MEASUREMENT, &[0, bpm])?;
        }
        for _ in 0..3 {
            if receiver.recv_timeout(Duration::from_secs(1)).is_err() {
                break;
            }
        }
        connection.notification_stop(&MEASUREMENT)?;
        connection.unregister_notification_handler()?;

        connection.disconnect(true)?;
        adapter.close()
    })??;

    gattlib.shutdown();
    Ok(())
}
