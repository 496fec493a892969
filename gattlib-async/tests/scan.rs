mod common;

use std::time::Duration;

use futures_lite::StreamExt;
use gattlib_async::DiscoveryFilter;
use gattlib_async::simulated::Peripheral;
use tokio::time::timeout;

use common::{ADDRESS, BATTERY, setup};

#[tokio::test]
async fn scan_stream_ends_with_the_scan() {
    let (_gattlib, platform, adapter) = setup();
    platform
        .add_peripheral("hci0", Peripheral::new("11:22:33:44:55:66"))
        .unwrap();

    let stream = adapter
        .scan(
            DiscoveryFilter::default().with_uuids([BATTERY]),
            Duration::from_millis(100),
        )
        .unwrap();
    let devices: Vec<_> = timeout(Duration::from_secs(5), stream.collect())
        .await
        .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address, ADDRESS);
    assert_eq!(devices[0].name.as_deref(), Some("Battery"));
    assert!(!adapter.is_scanning().unwrap());
}

#[tokio::test]
async fn dropping_the_stream_stops_the_scan() {
    let (_gattlib, platform, adapter) = setup();

    let mut stream = adapter
        .scan(DiscoveryFilter::default(), Duration::ZERO)
        .unwrap();
    let device = timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.address, ADDRESS);
    assert!(platform.is_discovering("hci0"));

    drop(stream);
    assert!(!adapter.is_scanning().unwrap());
    assert!(!platform.is_discovering("hci0"));

    // The adapter is free to scan again.
    let stream = adapter
        .scan(DiscoveryFilter::default(), Duration::ZERO)
        .unwrap();
    assert!(adapter.is_scanning().unwrap());
    drop(stream);
}
