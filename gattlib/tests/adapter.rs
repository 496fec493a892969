mod common;

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use gattlib::advertisement_data::AdvertisementData;
use gattlib::eddystone::{EDDYSTONE_SERVICE, EddystoneFrame, EddystoneTypes};
use gattlib::platform::DiscoveredDevice;
use gattlib::simulated::Peripheral;
use gattlib::{Config, ConnectOptions, DeviceState, DiscoveryFilter, ErrorKind, Gattlib};

use common::{ADDRESS, BATTERY, battery, setup};

#[test]
fn open_is_idempotent_and_counted() {
    let (gattlib, platform, first) = setup(Config::default());

    let second = gattlib.adapter_open(Some("hci0")).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reference_count().unwrap(), 2);

    let third = gattlib.adapter_open(Some("/org/bluez/hci0")).unwrap();
    assert_eq!(first, third);
    assert_eq!(first.reference_count().unwrap(), 3);

    third.release().unwrap();
    second.release().unwrap();
    assert_eq!(first.reference_count().unwrap(), 1);
    assert!(platform.is_open("hci0"));

    let stale = first.clone();
    first.close().unwrap();
    assert!(!platform.is_open("hci0"));
    assert!(!stale.is_valid());
    assert_eq!(
        stale.reference_count().unwrap_err().kind(),
        ErrorKind::AdapterClosed
    );

    let reopened = gattlib.adapter_open(None).unwrap();
    assert_ne!(reopened, stale);
    assert_eq!(reopened.reference_count().unwrap(), 1);
}

#[test]
fn retain_takes_a_reference() {
    let (_gattlib, _platform, adapter) = setup(Config::default());
    let retained = adapter.retain().unwrap();
    assert_eq!(adapter.reference_count().unwrap(), 2);
    retained.release().unwrap();
    assert!(adapter.is_valid());
}

#[test]
fn unknown_adapter_is_not_found() {
    let (gattlib, _platform, _adapter) = setup(Config::default());
    assert_eq!(
        gattlib.adapter_open(Some("hci7")).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        gattlib.adapter_open(Some("")).unwrap_err().kind(),
        ErrorKind::InvalidParameter
    );
}

#[test]
fn close_is_refused_while_a_device_is_connected() {
    let (_gattlib, _platform, adapter) = setup(Config::default());
    let connection = adapter
        .connect_sync(ADDRESS, ConnectOptions::default())
        .unwrap();
    // One reference for the open, one for the active device.
    assert_eq!(adapter.reference_count().unwrap(), 2);

    assert_eq!(
        adapter.clone().close().unwrap_err().kind(),
        ErrorKind::Busy
    );
    assert!(adapter.is_valid());
    assert!(connection.is_connected());

    connection.disconnect(true).unwrap();
    assert_eq!(adapter.reference_count().unwrap(), 1);
    adapter.close().unwrap();
}

#[test]
fn scan_reports_each_matching_device_once() {
    let (_gattlib, platform, adapter) = setup(Config::default());
    platform
        .add_peripheral("hci0", Peripheral::new("11:22:33:44:55:66"))
        .unwrap();

    let (sender, receiver) = mpsc::channel();
    adapter
        .scan_enable_non_blocking(
            move |device: &DiscoveredDevice| {
                let _ = sender.send(device.address.clone());
            },
            Duration::ZERO,
            DiscoveryFilter::default().with_uuids([BATTERY]),
        )
        .unwrap();
    assert!(adapter.is_scanning().unwrap());
    assert!(platform.is_discovering("hci0"));

    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
        ADDRESS
    );
    platform.advertise("hci0", ADDRESS, Some(-40)).unwrap();
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());

    assert_eq!(
        adapter.device_state(ADDRESS).unwrap(),
        DeviceState::Disconnected
    );
    assert_eq!(
        adapter.device_state("11:22:33:44:55:66").unwrap(),
        DeviceState::NotFound
    );

    adapter.scan_disable().unwrap();
    assert!(!adapter.is_scanning().unwrap());
    assert!(!platform.is_discovering("hci0"));
    // Disabling twice is harmless.
    adapter.scan_disable().unwrap();
}

#[test]
fn scan_with_notify_change_repeats_devices() {
    let (_gattlib, platform, adapter) = setup(Config::default());

    let (sender, receiver) = mpsc::channel();
    adapter
        .scan_enable_non_blocking(
            move |device: &DiscoveredDevice| {
                let _ = sender.send(device.rssi);
            },
            Duration::ZERO,
            DiscoveryFilter::default().with_notify_change(true),
        )
        .unwrap();

    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
        Some(-60)
    );
    platform.advertise("hci0", ADDRESS, Some(-42)).unwrap();
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
        Some(-42)
    );
    adapter.scan_disable().unwrap();
}

#[test]
fn only_one_scan_at_a_time() {
    let (_gattlib, _platform, adapter) = setup(Config::default());
    adapter
        .scan_enable_non_blocking(
            |_: &DiscoveredDevice| (),
            Duration::ZERO,
            DiscoveryFilter::default(),
        )
        .unwrap();
    assert_eq!(
        adapter
            .scan_enable_non_blocking(
                |_: &DiscoveredDevice| (),
                Duration::ZERO,
                DiscoveryFilter::default()
            )
            .unwrap_err()
            .kind(),
        ErrorKind::Busy
    );
    adapter.scan_disable().unwrap();
}

#[test]
fn blocking_scan_ends_at_its_timeout() {
    let (_gattlib, _platform, adapter) = setup(Config::default());

    let (sender, receiver) = mpsc::channel();
    let start = Instant::now();
    adapter
        .scan_enable(
            move |device: &DiscoveredDevice| {
                let _ = sender.send(device.address.clone());
            },
            Duration::from_millis(100),
            DiscoveryFilter::default(),
        )
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert!(!adapter.is_scanning().unwrap());

    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
        ADDRESS
    );
}

#[test]
fn blocking_scan_ends_when_disabled_elsewhere() {
    let (_gattlib, _platform, adapter) = setup(Config::default());

    let disabler = adapter.clone();
    let stopper = thread::spawn(move || {
        while !disabler.is_scanning().unwrap() {
            thread::sleep(Duration::from_millis(1));
        }
        disabler.scan_disable().unwrap();
    });

    adapter
        .scan_enable(|_: &DiscoveredDevice| (), Duration::ZERO, DiscoveryFilter::default())
        .unwrap();
    stopper.join().unwrap();
    assert!(!adapter.is_scanning().unwrap());
}

#[test]
fn closing_stops_the_scan() {
    let (_gattlib, platform, adapter) = setup(Config::default());
    adapter
        .scan_enable_non_blocking(
            |_: &DiscoveredDevice| (),
            Duration::ZERO,
            DiscoveryFilter::default(),
        )
        .unwrap();
    adapter.close().unwrap();
    assert!(!platform.is_discovering("hci0"));
    assert!(!platform.is_open("hci0"));
}

#[test]
fn advertisement_data_of_known_devices() {
    let (_gattlib, _platform, adapter) = setup(Config::default());
    assert_eq!(
        adapter.advertisement_data(ADDRESS).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let connection = adapter
        .connect_sync(ADDRESS, ConnectOptions::default())
        .unwrap();
    let data = adapter.advertisement_data(ADDRESS).unwrap();
    assert_eq!(data.local_name.as_deref(), Some("Battery"));
    assert!(data.advertises(&BATTERY));
    connection.disconnect(true).unwrap();
}

#[test]
fn removal_is_ignored_mid_lifecycle() {
    let (_gattlib, platform, adapter) = setup(Config::default());
    let connection = adapter
        .connect_sync(ADDRESS, ConnectOptions::default())
        .unwrap();

    platform.remove_device("hci0", ADDRESS).unwrap();
    assert_eq!(adapter.device_state(ADDRESS).unwrap(), DeviceState::Connected);
    assert!(connection.is_valid());

    connection.disconnect(true).unwrap();
    platform.remove_device("hci0", ADDRESS).unwrap();
    assert_eq!(adapter.device_state(ADDRESS).unwrap(), DeviceState::NotFound);
}

#[test]
fn shutdown_closes_everything() {
    let (gattlib, _platform, adapter) = setup(Config::default());
    gattlib.shutdown();
    assert!(!adapter.is_valid());
    assert_eq!(
        gattlib.adapter_open(None).unwrap_err().kind(),
        ErrorKind::AdapterClosed
    );
}

#[test]
fn mainloop_runs_the_task_on_its_own_thread() {
    common::init_tracing();
    let (gattlib, platform) = Gattlib::simulated(Config::default()).unwrap();
    platform.add_peripheral("hci0", battery(ADDRESS)).unwrap();

    let res = gattlib
        .mainloop(|instance| -> gattlib::Result<String> {
            assert_eq!(thread::current().name(), Some("gattlib-task"));
            let adapter = instance.adapter_open(None)?;
            let id = adapter.id().to_owned();
            adapter.close()?;
            Ok(id)
        })
        .unwrap();
    assert_eq!(res.unwrap(), "/org/bluez/hci0");
}

#[test]
fn eddystone_scan_reports_requested_frames() {
    fn beacon(address: &str, frame: &[u8]) -> Peripheral {
        let mut advertisement_data = AdvertisementData::default();
        advertisement_data
            .service_data
            .insert(EDDYSTONE_SERVICE, frame.to_vec());
        Peripheral::new(address).with_advertisement_data(advertisement_data)
    }

    let (_gattlib, platform, adapter) = setup(Config::default());
    platform
        .add_peripheral("hci0", beacon("11:22:33:44:55:66", b"\x10\x00\x02lab\x07"))
        .unwrap();
    platform
        .add_peripheral(
            "hci0",
            beacon(
                "22:33:44:55:66:77",
                &[0x20, 0x00, 0x0b, 0xb8, 0x19, 0x80, 0, 0, 0, 1, 0, 0, 0, 1],
            ),
        )
        .unwrap();

    let (sender, receiver) = mpsc::channel();
    adapter
        .scan_eddystone(
            EddystoneTypes::URL,
            None,
            move |device: &DiscoveredDevice, frame: &EddystoneFrame| {
                let _ = sender.send((device.address.clone(), frame.clone()));
            },
            Duration::from_millis(200),
        )
        .unwrap();
    assert!(!adapter.is_scanning().unwrap());

    let (address, frame) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(address, "11:22:33:44:55:66");
    assert_eq!(
        frame,
        EddystoneFrame::Url {
            tx_power: 0,
            url: "http://lab.com".to_owned(),
        }
    );
    // The battery peripheral is filtered out by the platform, the telemetry beacon by type.
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
}
