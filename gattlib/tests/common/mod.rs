#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use btuuid::BluetoothUuid;
use gattlib::simulated::{Peripheral, SimCharacteristic, SimService};
use gattlib::{Adapter, CharacteristicProperties, Config, Gattlib, SimulatedPlatform};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

pub const BATTERY: BluetoothUuid = BluetoothUuid::from_u16(0x180f);
pub const LEVEL: BluetoothUuid = BluetoothUuid::from_u16(0x2a19);
pub const ALERT: BluetoothUuid = BluetoothUuid::from_u16(0x2a06);
pub const CONTROL: BluetoothUuid = BluetoothUuid::from_u16(0x2a39);
pub const CCCD: BluetoothUuid = BluetoothUuid::from_u16(0x2902);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A battery service with a readable, notifying level, an indicated alert and a writable control point.
pub fn battery(address: &str) -> Peripheral {
    Peripheral::new(address)
        .with_name("Battery")
        .with_rssi(-60)
        .with_service(
            SimService::new(BATTERY)
                .with_characteristic(
                    SimCharacteristic::new(
                        LEVEL,
                        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                    )
                    .with_value([80])
                    .with_descriptor(CCCD),
                )
                .with_characteristic(
                    SimCharacteristic::new(ALERT, CharacteristicProperties::INDICATE)
                        .with_descriptor(CCCD),
                )
                .with_characteristic(SimCharacteristic::new(
                    CONTROL,
                    CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESP,
                )),
        )
}

/// A library instance with one battery peripheral in range and the default adapter open.
pub fn setup(config: Config) -> (Gattlib, SimulatedPlatform, Adapter) {
    init_tracing();
    let (gattlib, platform) = Gattlib::simulated(config).unwrap();
    platform.add_peripheral("hci0", battery(ADDRESS)).unwrap();
    let adapter = gattlib.adapter_open(None).unwrap();
    (gattlib, platform, adapter)
}

/// Polls `check` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
