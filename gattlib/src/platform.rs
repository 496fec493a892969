//! The boundary to the platform Bluetooth service.
//!
//! A [`Platform`] implementation talks to the actual Bluetooth stack. The library calls into it
//! from its event loop thread, and the platform reports asynchronous happenings back through the
//! [`EventSink`] it is given in [`Platform::attach`].

use std::sync::Weak;

use btuuid::BluetoothUuid;
use tracing::trace;

use crate::advertisement_data::AdvertisementData;
use crate::config::{ConnectOptions, DiscoveryFilter};
use crate::context::Core;
use crate::error::{Error, ErrorKind, Result};
use crate::gatt::{
    Characteristic, Descriptor, HandleRange, PrimaryService, SubscriptionKind, WriteType,
};
use crate::registry;
use crate::sync::Reply;

/// An adapter as reported by the platform when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterInfo {
    /// The platform identifier, e.g. `/org/bluez/hci0`.
    pub id: String,
    /// The name the adapter was opened with, e.g. `hci0`.
    pub name: String,
}

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// The platform identifier of the device.
    pub id: String,
    /// The device's Bluetooth address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub advertisement_data: AdvertisementData,
}

/// Something the platform observed, reported through an [`EventSink`].
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A device advertised during discovery.
    DeviceDiscovered {
        adapter: String,
        device: DiscoveredDevice,
    },
    /// A connection attempt completed and the GATT session is ready.
    DeviceConnected { adapter: String, device: String },
    /// A connection attempt failed.
    ConnectFailed {
        adapter: String,
        device: String,
        error: Error,
    },
    /// An established link went away, whether requested or not.
    DeviceDisconnected { adapter: String, device: String },
    /// The platform forgot a device.
    DeviceRemoved { adapter: String, device: String },
    /// A subscribed characteristic changed its value.
    ValueChanged {
        adapter: String,
        device: String,
        uuid: BluetoothUuid,
        kind: SubscriptionKind,
        value: Vec<u8>,
    },
}

/// Delivers [`PlatformEvent`]s to the event loop.
///
/// Emitting never blocks and may be done from any thread, including from inside a [`Platform`] or
/// [`GattSession`] call. Events emitted after the library has shut down are dropped.
#[derive(Clone)]
pub struct EventSink {
    core: Weak<Core>,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl EventSink {
    pub(crate) fn new(core: Weak<Core>) -> Self {
        Self { core }
    }

    pub fn emit(&self, event: PlatformEvent) {
        let Some(core) = self.core.upgrade() else {
            trace!("dropping {event:?}: library shut down");
            return;
        };

        let target = core.clone();
        if core
            .registry
            .lock_async(move |registry, _| registry::handle_event(registry, &target, event))
            .is_err()
        {
            trace!("dropping event: event loop closed");
        }
    }
}

/// The platform Bluetooth service.
///
/// All methods are called on the library's event loop thread.
pub trait Platform: Send + Sync {
    /// Hands the platform the sink it must report events through.
    fn attach(&self, sink: EventSink);

    /// Opens the adapter called `name` and powers its radio on.
    fn open_adapter(&self, name: &str) -> Result<AdapterInfo>;

    /// Releases an adapter returned by [`open_adapter`][Self::open_adapter].
    fn close_adapter(&self, adapter: &str) -> Result<()>;

    /// Starts reporting advertisements matching `filter` as [`PlatformEvent::DeviceDiscovered`].
    fn start_discovery(&self, adapter: &str, filter: &DiscoveryFilter) -> Result<()>;

    fn stop_discovery(&self, adapter: &str) -> Result<()>;

    /// Maps a Bluetooth address to the platform's identifier for that device.
    fn device_id(&self, adapter: &str, address: &str) -> Result<String>;

    /// Begins connecting to `device`.
    ///
    /// The attempt completes asynchronously with [`PlatformEvent::DeviceConnected`] or
    /// [`PlatformEvent::ConnectFailed`]. The returned session is not used before then.
    fn connect(
        &self,
        adapter: &str,
        device: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn GattSession>>;

    /// Returns the most recent advertisement of `device`.
    fn advertisement_data(&self, adapter: &str, device: &str) -> Result<AdvertisementData> {
        let _ = (adapter, device);
        Err(ErrorKind::NotSupported.into())
    }
}

/// A GATT session with one device.
///
/// Requests complete through the [`Reply`] they are given, from any thread. All methods are
/// called on the library's event loop thread.
pub trait GattSession: Send {
    /// Requests the link be torn down.
    ///
    /// The platform confirms with [`PlatformEvent::DeviceDisconnected`].
    fn disconnect(&mut self) -> Result<()>;

    fn discover_primary_services(&mut self, reply: Reply<Vec<PrimaryService>>);

    fn discover_characteristics(&mut self, range: HandleRange, reply: Reply<Vec<Characteristic>>);

    fn discover_descriptors(&mut self, range: HandleRange, reply: Reply<Vec<Descriptor>>);

    fn read(&mut self, uuid: &BluetoothUuid, reply: Reply<Vec<u8>>);

    fn write(
        &mut self,
        uuid: &BluetoothUuid,
        data: Vec<u8>,
        write_type: WriteType,
        reply: Reply<()>,
    );

    /// Writes the characteristic value stored at `handle`.
    fn write_by_handle(
        &mut self,
        handle: u16,
        data: Vec<u8>,
        write_type: WriteType,
        reply: Reply<()>,
    );

    /// Readies the characteristic identified by `uuid` for a stream of writes without response,
    /// replying with the ATT MTU of the link.
    fn acquire_write(&mut self, uuid: &BluetoothUuid, reply: Reply<u16>);

    fn subscribe(&mut self, uuid: &BluetoothUuid, kind: SubscriptionKind, reply: Reply<()>);

    fn unsubscribe(&mut self, uuid: &BluetoothUuid, kind: SubscriptionKind, reply: Reply<()>);

    /// Releases the session's resources. Called once, after the link is gone.
    fn close(&mut self) {}
}
