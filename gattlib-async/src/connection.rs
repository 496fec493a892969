use std::ops::Deref;
use std::sync::{Arc, Weak};

use async_io::Timer;
use btuuid::BluetoothUuid;
use futures_lite::future;
use gattlib::{
    Characteristic, Connection, Descriptor, HandleRange, PrimaryService, SubscriptionKind,
    WriteType,
};
use tracing::trace;

use crate::error::Result;
use crate::util::{Broadcast, BroadcastReceiver};

/// A value pushed by the device for a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueNotification {
    pub uuid: BluetoothUuid,
    pub kind: SubscriptionKind,
    pub value: Vec<u8>,
}

struct Shared {
    notifications: Broadcast<ValueNotification>,
    disconnected: Broadcast<()>,
}

/// A [`Connection`] with `async` GATT operations.
///
/// Notifications, indications and the disconnection are delivered through broadcast channels,
/// which take over the handler slots of the underlying connection. Registering other handlers
/// on the inner connection replaces them.
#[derive(Clone)]
pub struct ConnectionAsync {
    inner: Connection,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionAsync").field(&self.inner).finish()
    }
}

impl PartialEq for ConnectionAsync {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for ConnectionAsync {}

impl Deref for ConnectionAsync {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl ConnectionAsync {
    /// Wraps `connection`, registering its notification, indication and disconnect handlers.
    pub fn new(connection: Connection) -> Result<Self> {
        let shared = Arc::new(Shared {
            notifications: Broadcast::new(64),
            disconnected: Broadcast::new(1),
        });

        for kind in [SubscriptionKind::Notification, SubscriptionKind::Indication] {
            let weak = Arc::downgrade(&shared);
            let handler = move |uuid: &BluetoothUuid, value: &[u8]| {
                forward(&weak, uuid, kind, value)
            };
            match kind {
                SubscriptionKind::Notification => {
                    connection.register_notification_handler(handler)?
                }
                SubscriptionKind::Indication => connection.register_indication_handler(handler)?,
            }
        }

        let weak = Arc::downgrade(&shared);
        connection.register_disconnect_handler(move |connection: &Connection| {
            trace!("{}: disconnected", connection.address());
            if let Some(shared) = weak.upgrade() {
                shared.disconnected.publish(());
            }
        })?;

        Ok(Self {
            inner: connection,
            shared,
        })
    }

    pub fn into_inner(self) -> Connection {
        self.inner
    }

    /// Returns a stream of the values pushed for subscribed characteristics.
    ///
    /// The channel is bounded. A receiver that falls behind loses the oldest values.
    pub fn notifications(&self) -> BroadcastReceiver<ValueNotification> {
        self.shared.notifications.subscribe()
    }

    pub async fn subscribe(&self, uuid: &BluetoothUuid, kind: SubscriptionKind) -> Result<()> {
        Ok(self.inner.request_subscribe(uuid, kind)?.await?)
    }

    pub async fn unsubscribe(&self, uuid: &BluetoothUuid, kind: SubscriptionKind) -> Result<()> {
        Ok(self.inner.request_unsubscribe(uuid, kind)?.await?)
    }

    pub async fn discover_primary_services(&self) -> Result<Vec<PrimaryService>> {
        Ok(self.inner.request_primary_services()?.await?)
    }

    pub async fn discover_characteristics(&self, range: HandleRange) -> Result<Vec<Characteristic>> {
        Ok(self.inner.request_characteristics(range)?.await?)
    }

    pub async fn discover_all_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.discover_characteristics(HandleRange::ALL).await
    }

    pub async fn discover_descriptors(&self, range: HandleRange) -> Result<Vec<Descriptor>> {
        Ok(self.inner.request_descriptors(range)?.await?)
    }

    pub async fn read(&self, uuid: &BluetoothUuid) -> Result<Vec<u8>> {
        Ok(self.inner.request_read(uuid)?.await?)
    }

    pub async fn write(
        &self,
        uuid: &BluetoothUuid,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        Ok(self.inner.request_write(uuid, data, write_type)?.await?)
    }

    /// Writes `data` to the characteristic value at `handle`.
    pub async fn write_by_handle(
        &self,
        handle: u16,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        Ok(self
            .inner
            .request_write_by_handle(handle, data, write_type)?
            .await?)
    }

    /// Resolves once the connection has gone away.
    pub async fn disconnected(&self) {
        let mut receiver = self.shared.disconnected.subscribe();
        if !self.inner.is_valid() {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Disconnects and waits for the platform to confirm it.
    ///
    /// The wait is bounded by the configured disconnection wait timeout, after which this fails
    /// with [`gattlib::ErrorKind::Timeout`] and the device is left disconnecting.
    pub async fn disconnect(&self) -> Result<()> {
        let mut receiver = self.shared.disconnected.subscribe();
        self.inner.disconnect(false)?;

        let timeout = self.inner.adapter().config().disconnection_wait_timeout;
        let confirmed = async {
            let _ = receiver.recv().await;
            true
        };
        let elapsed = async {
            Timer::after(timeout).await;
            false
        };
        if future::or(confirmed, elapsed).await {
            Ok(())
        } else {
            trace!("{}: disconnection not confirmed", self.inner.address());
            Err(gattlib::ErrorKind::Timeout.into())
        }
    }
}

fn forward(shared: &Weak<Shared>, uuid: &BluetoothUuid, kind: SubscriptionKind, value: &[u8]) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let notification = ValueNotification {
        uuid: uuid.clone(),
        kind,
        value: value.to_vec(),
    };
    if !shared.notifications.publish(notification) {
        trace!("no listeners for {kind} value");
    }
}
