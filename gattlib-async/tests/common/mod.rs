#![allow(dead_code)]

use btuuid::BluetoothUuid;
use gattlib_async::simulated::{Peripheral, SimCharacteristic, SimService};
use gattlib_async::{AdapterAsync, CharacteristicProperties, Config, Gattlib, SimulatedPlatform};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

pub const BATTERY: BluetoothUuid = BluetoothUuid::from_u16(0x180f);
pub const LEVEL: BluetoothUuid = BluetoothUuid::from_u16(0x2a19);
pub const ALERT: BluetoothUuid = BluetoothUuid::from_u16(0x2a06);
pub const CONTROL: BluetoothUuid = BluetoothUuid::from_u16(0x2a39);

pub fn setup() -> (Gattlib, SimulatedPlatform, AdapterAsync) {
    setup_with(Config::default())
}

pub fn setup_with(config: Config) -> (Gattlib, SimulatedPlatform, AdapterAsync) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (gattlib, platform) = Gattlib::simulated(config).unwrap();
    platform
        .add_peripheral(
            "hci0",
            Peripheral::new(ADDRESS).with_name("Battery").with_service(
                SimService::new(BATTERY)
                    .with_characteristic(
                        SimCharacteristic::new(
                            LEVEL,
                            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                        )
                        .with_value([80]),
                    )
                    .with_characteristic(SimCharacteristic::new(
                        ALERT,
                        CharacteristicProperties::INDICATE,
                    ))
                    .with_characteristic(SimCharacteristic::new(
                        CONTROL,
                        CharacteristicProperties::WRITE,
                    )),
            ),
        )
        .unwrap();
    let adapter = AdapterAsync::open(&gattlib, None).unwrap();
    (gattlib, platform, adapter)
}
