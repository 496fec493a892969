mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btuuid::BluetoothUuid;
use gattlib::{Config, ConnectOptions, Connection, ErrorKind};

use common::{ADDRESS, ALERT, CONTROL, LEVEL, eventually, setup};

fn recorder() -> (
    Arc<Mutex<Vec<Vec<u8>>>>,
    impl Fn(&BluetoothUuid, &[u8]) + Send + Sync + 'static,
) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = values.clone();
    (values, move |_: &BluetoothUuid, value: &[u8]| {
        sink.lock().unwrap().push(value.to_vec())
    })
}

fn connect() -> (gattlib::Gattlib, gattlib::SimulatedPlatform, Connection) {
    let (gattlib, platform, adapter) = setup(Config::default());
    let connection = adapter
        .connect_sync(ADDRESS, ConnectOptions::default())
        .unwrap();
    (gattlib, platform, connection)
}

#[test]
fn notifications_arrive_in_order() {
    let (_gattlib, platform, connection) = connect();
    let (values, handler) = recorder();
    connection.register_notification_handler(handler).unwrap();
    connection.notification_start(&LEVEL).unwrap();

    for i in 1..=200u8 {
        platform.notify("hci0", ADDRESS, &LEVEL, &[i]).unwrap();
    }
    assert!(eventually(Duration::from_secs(5), || values.lock().unwrap().len() == 200));
    connection.unregister_notification_handler().unwrap();

    let expected: Vec<Vec<u8>> = (1..=200u8).map(|i| vec![i]).collect();
    assert_eq!(*values.lock().unwrap(), expected);

    platform.notify("hci0", ADDRESS, &LEVEL, &[0]).unwrap();
    assert!(connection.is_connected());
    assert_eq!(values.lock().unwrap().len(), 200);

    connection.disconnect(true).unwrap();
}

#[test]
fn values_before_subscribing_are_dropped() {
    let (_gattlib, platform, connection) = connect();
    let (values, handler) = recorder();
    connection.register_notification_handler(handler).unwrap();

    platform.notify("hci0", ADDRESS, &LEVEL, &[1]).unwrap();
    connection.notification_start(&LEVEL).unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[2]).unwrap();
    connection.notification_stop(&LEVEL).unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[3]).unwrap();

    assert!(eventually(Duration::from_secs(5), || !values.lock().unwrap().is_empty()));
    connection.unregister_notification_handler().unwrap();
    assert_eq!(*values.lock().unwrap(), [vec![2]]);
}

#[test]
fn indications_use_their_own_handler() {
    let (_gattlib, platform, connection) = connect();
    let (notifications, notification_handler) = recorder();
    let (indications, indication_handler) = recorder();
    connection
        .register_notification_handler(notification_handler)
        .unwrap();
    connection
        .register_indication_handler(indication_handler)
        .unwrap();

    connection.indication_start(&ALERT).unwrap();
    platform.notify("hci0", ADDRESS, &ALERT, &[7]).unwrap();
    connection.indication_stop(&ALERT).unwrap();

    assert!(eventually(Duration::from_secs(5), || !indications.lock().unwrap().is_empty()));
    connection.unregister_indication_handler().unwrap();
    connection.unregister_notification_handler().unwrap();
    assert_eq!(*indications.lock().unwrap(), [vec![7]]);
    assert!(notifications.lock().unwrap().is_empty());
}

#[test]
fn subscription_errors() {
    let (_gattlib, _platform, connection) = connect();

    assert_eq!(
        connection.notification_start(&CONTROL).unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(
        connection.indication_start(&LEVEL).unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(
        connection.notification_stop(&LEVEL).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    connection.notification_start(&LEVEL).unwrap();
    // Already subscribed.
    connection.notification_start(&LEVEL).unwrap();
    connection.notification_stop(&LEVEL).unwrap();
    assert_eq!(
        connection.notification_stop(&LEVEL).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn replacing_a_handler_keeps_the_subscription() {
    let (_gattlib, platform, connection) = connect();
    let (first, first_handler) = recorder();
    let (second, second_handler) = recorder();

    connection.register_notification_handler(first_handler).unwrap();
    connection.notification_start(&LEVEL).unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[1]).unwrap();
    assert!(eventually(Duration::from_secs(5), || first.lock().unwrap().len() == 1));

    connection.register_notification_handler(second_handler).unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[2]).unwrap();
    assert!(eventually(Duration::from_secs(5), || !second.lock().unwrap().is_empty()));
    connection.unregister_notification_handler().unwrap();

    assert_eq!(*first.lock().unwrap(), [vec![1]]);
    assert_eq!(*second.lock().unwrap(), [vec![2]]);
}

#[test]
fn disconnection_invalidates_handlers() {
    let (_gattlib, platform, connection) = connect();
    let (values, handler) = recorder();
    connection.register_notification_handler(handler).unwrap();
    connection.notification_start(&LEVEL).unwrap();

    platform.drop_link("hci0", ADDRESS).unwrap();
    assert!(eventually(Duration::from_secs(5), || !connection.is_valid()));
    assert_eq!(
        connection.notification_start(&LEVEL).unwrap_err().kind(),
        ErrorKind::DeviceDisconnected
    );
    assert_eq!(
        connection.unregister_notification_handler().unwrap_err().kind(),
        ErrorKind::DeviceDisconnected
    );

    // The new link has no subscription, and the old handler is gone.
    let reconnected = connection
        .adapter()
        .connect_sync(ADDRESS, ConnectOptions::default())
        .unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[9]).unwrap();
    assert!(reconnected.is_connected());
    assert!(values.lock().unwrap().is_empty());
    reconnected.disconnect(true).unwrap();
}

#[test]
fn unregistering_discards_queued_values() {
    let (_gattlib, platform, connection) = connect();
    let (values, handler) = recorder();
    let slow = move |uuid: &BluetoothUuid, value: &[u8]| {
        std::thread::sleep(Duration::from_millis(20));
        handler(uuid, value);
    };
    connection.register_notification_handler(slow).unwrap();
    connection.notification_start(&LEVEL).unwrap();

    for i in 1..=20u8 {
        platform.notify("hci0", ADDRESS, &LEVEL, &[i]).unwrap();
    }
    connection.unregister_notification_handler().unwrap();

    // Whatever got through is a prefix, and nothing arrives afterwards.
    let delivered = values.lock().unwrap().clone();
    assert!(delivered.len() < 20);
    let expected: Vec<Vec<u8>> = (1..=delivered.len() as u8).map(|i| vec![i]).collect();
    assert_eq!(delivered, expected);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(values.lock().unwrap().len(), delivered.len());
}

#[test]
fn handler_can_call_back_into_the_library() {
    let (_gattlib, platform, connection) = connect();
    let (sender, receiver) = mpsc::channel();
    let reader = connection.clone();
    connection
        .register_notification_handler(move |_: &BluetoothUuid, _: &[u8]| {
            let _ = sender.send(reader.read_by_uuid(&LEVEL));
        })
        .unwrap();
    connection.notification_start(&LEVEL).unwrap();

    platform.notify("hci0", ADDRESS, &LEVEL, &[42]).unwrap();
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(5)).unwrap(),
        Ok(vec![42])
    );
    connection.unregister_notification_handler().unwrap();
}

#[test]
fn running_handler_finishes_before_the_disconnect_handler() {
    let (_gattlib, platform, connection) = connect();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (started, running) = mpsc::channel();

    let record = order.clone();
    connection
        .register_notification_handler(move |_: &BluetoothUuid, _: &[u8]| {
            let _ = started.send(());
            std::thread::sleep(Duration::from_millis(200));
            record.lock().unwrap().push("notification");
        })
        .unwrap();
    let record = order.clone();
    let (sender, receiver) = mpsc::channel();
    connection
        .register_disconnect_handler(move |_: &Connection| {
            record.lock().unwrap().push("disconnect");
            let _ = sender.send(());
        })
        .unwrap();
    connection.notification_start(&LEVEL).unwrap();

    platform.notify("hci0", ADDRESS, &LEVEL, &[1]).unwrap();
    running.recv_timeout(Duration::from_secs(5)).unwrap();
    platform.drop_link("hci0", ADDRESS).unwrap();

    receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(*order.lock().unwrap(), ["notification", "disconnect"]);
}

#[test]
fn value_right_after_subscribing_is_delivered() {
    let (_gattlib, platform, connection) = connect();
    let (values, handler) = recorder();
    connection.register_notification_handler(handler).unwrap();

    let subscribed = connection
        .request_subscribe(&LEVEL, gattlib::SubscriptionKind::Notification)
        .unwrap();
    platform.notify("hci0", ADDRESS, &LEVEL, &[5]).unwrap();
    subscribed.wait(Some(Duration::from_secs(5))).unwrap();

    assert!(eventually(Duration::from_secs(5), || !values.lock().unwrap().is_empty()));
    assert_eq!(*values.lock().unwrap(), [vec![5]]);

    // A refused subscription is not left behind.
    let refused = connection
        .request_subscribe(&CONTROL, gattlib::SubscriptionKind::Notification)
        .unwrap();
    assert_eq!(
        refused.wait(Some(Duration::from_secs(5))).unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(
        connection.notification_stop(&CONTROL).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    connection.unregister_notification_handler().unwrap();
}
