//! User callbacks and the machinery that runs them off the event loop.
//!
//! Discovery, connection and disconnection events are each delivered on a fresh one-shot thread.
//! Notification and indication values go through the per-connection queue of their handler slot
//! instead (see [`crate::notification`]), which keeps them in delivery order. A disconnection
//! is delivered only after those queues have wound down.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use btuuid::BluetoothUuid;
use serial_executor::Executor;
use tracing::{error, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::platform::DiscoveredDevice;

/// Called for each device found while scanning.
pub trait DiscoveredHandler: Send + Sync + 'static {
    fn on_discovered(&self, device: &DiscoveredDevice);
}

impl<F: Fn(&DiscoveredDevice) + Send + Sync + 'static> DiscoveredHandler for F {
    fn on_discovered(&self, device: &DiscoveredDevice) {
        self(device)
    }
}

/// Called once when a connection attempt completes, successfully or not.
pub trait ConnectHandler: Send + 'static {
    fn on_connect(self: Box<Self>, result: Result<Connection>);
}

impl<F: FnOnce(Result<Connection>) + Send + 'static> ConnectHandler for F {
    fn on_connect(self: Box<Self>, result: Result<Connection>) {
        (*self)(result)
    }
}

/// Called once when an established connection goes away.
pub trait DisconnectHandler: Send + 'static {
    fn on_disconnect(self: Box<Self>, connection: &Connection);
}

impl<F: FnOnce(&Connection) + Send + 'static> DisconnectHandler for F {
    fn on_disconnect(self: Box<Self>, connection: &Connection) {
        (*self)(connection)
    }
}

/// Called for each notification or indication received on a connection.
pub trait NotificationHandler: Send + Sync + 'static {
    fn on_value(&self, uuid: &BluetoothUuid, value: &[u8]);
}

impl<F: Fn(&BluetoothUuid, &[u8]) + Send + Sync + 'static> NotificationHandler for F {
    fn on_value(&self, uuid: &BluetoothUuid, value: &[u8]) {
        self(uuid, value)
    }
}

/// An event bound to the handler that will receive it. The payload is owned by the event.
pub(crate) enum Event {
    Discovered(Arc<dyn DiscoveredHandler>, DiscoveredDevice),
    Connected(Box<dyn ConnectHandler>, Result<Connection>),
    Disconnected(Box<dyn DisconnectHandler>, Connection),
    Notification(Arc<dyn NotificationHandler>, BluetoothUuid, Vec<u8>),
    Indication(Arc<dyn NotificationHandler>, BluetoothUuid, Vec<u8>),
}

impl Event {
    fn kind(&self) -> &'static str {
        match self {
            Event::Discovered(..) => "discovered",
            Event::Connected(..) => "connected",
            Event::Disconnected(..) => "disconnected",
            Event::Notification(..) => "notification",
            Event::Indication(..) => "indication",
        }
    }

    /// Runs the handler on the current thread. A panicking handler is logged and contained.
    pub(crate) fn deliver(self) {
        let kind = self.kind();
        let res = catch_unwind(AssertUnwindSafe(move || match self {
            Event::Discovered(handler, device) => handler.on_discovered(&device),
            Event::Connected(handler, result) => handler.on_connect(result),
            Event::Disconnected(handler, connection) => handler.on_disconnect(&connection),
            Event::Notification(handler, uuid, value) | Event::Indication(handler, uuid, value) => {
                handler.on_value(&uuid, &value)
            }
        }));

        if res.is_err() {
            error!("{kind} handler panicked");
        }
    }
}

/// Delivers `event` on a new detached thread.
pub(crate) fn spawn_oneshot(event: Event) {
    spawn_after(Vec::new(), event);
}

/// Delivers `event` on a new detached thread once every queue in `queues` has drained and its
/// worker has exited.
pub(crate) fn spawn_after(queues: Vec<Executor>, event: Event) {
    let name = format!("gattlib-{}", event.kind());
    let res = thread::Builder::new().name(name).spawn(move || {
        for queue in queues {
            queue.shutdown();
        }
        event.deliver()
    });
    if let Err(err) = res {
        warn!("failed to spawn dispatch thread: {err}");
    }
}
