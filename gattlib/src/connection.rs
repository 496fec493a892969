//! Connection establishment and teardown.

use std::hash::Hash;
use std::sync::Arc;

use async_io::Timer;
use serial_executor::{Executor, Task};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{Adapter, AdapterEntry, AdapterKey};
use crate::config::ConnectOptions;
use crate::context::Core;
use crate::device::DeviceState;
use crate::dispatch::{self, ConnectHandler, DisconnectHandler, Event};
use crate::error::{Error, ErrorKind, Result};
use crate::gatt::SubscriptionKind;
use crate::notification::HandlerSlot;
use crate::platform::GattSession;
use crate::registry::Registry;
use crate::sync::{self, Completion, Reply};

/// The connection a device owns while it is connecting, connected or disconnecting.
pub(crate) struct ConnectionEntry {
    serial: u64,
    session: Box<dyn GattSession>,
    on_connect: Option<Box<dyn ConnectHandler>>,
    timer: Option<Task<()>>,
    on_disconnect: Option<Box<dyn DisconnectHandler>>,
    notification: Option<HandlerSlot>,
    indication: Option<HandlerSlot>,
    subscriptions: Vec<(Uuid, SubscriptionKind)>,
}

impl ConnectionEntry {
    fn new(
        serial: u64,
        session: Box<dyn GattSession>,
        on_connect: Box<dyn ConnectHandler>,
        timer: Task<()>,
    ) -> Self {
        Self {
            serial,
            session,
            on_connect: Some(on_connect),
            timer: Some(timer),
            on_disconnect: None,
            notification: None,
            indication: None,
            subscriptions: Vec::new(),
        }
    }

    pub(crate) fn session(&mut self) -> &mut dyn GattSession {
        self.session.as_mut()
    }

    pub(crate) fn slot(&self, kind: SubscriptionKind) -> Option<&HandlerSlot> {
        match kind {
            SubscriptionKind::Notification => self.notification.as_ref(),
            SubscriptionKind::Indication => self.indication.as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: SubscriptionKind) -> &mut Option<HandlerSlot> {
        match kind {
            SubscriptionKind::Notification => &mut self.notification,
            SubscriptionKind::Indication => &mut self.indication,
        }
    }

    pub(crate) fn is_subscribed(&self, uuid: Uuid, kind: SubscriptionKind) -> bool {
        self.subscriptions.contains(&(uuid, kind))
    }

    pub(crate) fn set_subscribed(&mut self, uuid: Uuid, kind: SubscriptionKind, subscribed: bool) {
        if subscribed {
            if !self.is_subscribed(uuid, kind) {
                self.subscriptions.push((uuid, kind));
            }
        } else {
            self.subscriptions.retain(|entry| *entry != (uuid, kind));
        }
    }

    /// Releases everything the connection holds and hands back the queues of its handler slots.
    /// The slots are invalidated first, so no queued value reaches a handler afterwards, but a
    /// handler already running may still be busy until the queues are shut down.
    fn teardown(&mut self) -> Vec<Executor> {
        let queues = [self.notification.take(), self.indication.take()]
            .into_iter()
            .flatten()
            .map(HandlerSlot::invalidate)
            .collect();
        self.subscriptions.clear();
        self.session.close();
        queues
    }
}

/// A connection to a device.
///
/// Like [`Adapter`], a `Connection` is a handle: once the link is torn down every operation
/// fails with [`ErrorKind::DeviceDisconnected`].
#[derive(Clone)]
pub struct Connection {
    adapter: Adapter,
    device_id: String,
    address: String,
    serial: u64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("adapter", &self.adapter.id())
            .field("address", &self.address)
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.adapter == other.adapter
            && self.device_id == other.device_id
            && self.serial == other.serial
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.adapter.hash(state);
        self.device_id.hash(state);
        self.serial.hash(state);
    }
}

impl Adapter {
    /// Starts connecting to the device with the given address and returns immediately.
    ///
    /// `handler` is called exactly once, from another thread, with the established connection
    /// or with the reason the attempt failed. Fails straight away with [`ErrorKind::Busy`] if the
    /// device is not disconnected.
    pub fn connect(
        &self,
        address: &str,
        options: ConnectOptions,
        handler: impl ConnectHandler,
    ) -> Result<()> {
        if address.is_empty() {
            return Err(ErrorKind::InvalidParameter.into());
        }

        let adapter = self.clone();
        let address = address.to_owned();
        let handler: Box<dyn ConnectHandler> = Box::new(handler);
        self.core().run(move |registry, core| {
            begin_connect(registry, core, &adapter, &address, options, handler)
        })?
    }

    /// Connects to the device with the given address, blocking until the attempt completes.
    pub fn connect_sync(&self, address: &str, options: ConnectOptions) -> Result<Connection> {
        let (reply, completion) = sync::completion();
        self.connect(address, options, move |result: Result<Connection>| {
            reply.send(result)
        })?;
        // The connection timer bounds the attempt, and shutdown fails it.
        self.core().wait(completion, None)
    }
}

fn begin_connect(
    registry: &mut Registry,
    core: &Arc<Core>,
    adapter: &Adapter,
    address: &str,
    options: ConnectOptions,
    handler: Box<dyn ConnectHandler>,
) -> Result<()> {
    let serial = registry.next_serial();
    let entry = registry.adapter(adapter.key())?;
    let device_id = core.platform.device_id(&entry.info.id, address)?;

    let created = entry.devices.get(&device_id).is_none();
    if created {
        entry.set_device_state(&device_id, address, DeviceState::Disconnected)?;
    }

    let state = entry.devices.state(&device_id);
    if state != DeviceState::Disconnected {
        debug!("{address}: cannot connect while {state}");
        return Err(ErrorKind::Busy.into());
    }

    let session = match core.platform.connect(&entry.info.id, &device_id, &options) {
        Ok(session) => session,
        Err(err) => {
            if created {
                let _ = entry.set_device_state(&device_id, address, DeviceState::NotFound);
            }
            return Err(err);
        }
    };

    entry.set_device_state(&device_id, address, DeviceState::Connecting)?;
    let timer = arm_connection_timeout(core, adapter.key(), &device_id, serial);
    if let Some(device) = entry.devices.get_mut(&device_id) {
        device.connection = Some(ConnectionEntry::new(serial, session, handler, timer));
    }

    debug!("{address}: connecting");
    Ok(())
}

fn arm_connection_timeout(
    core: &Arc<Core>,
    key: &AdapterKey,
    device_id: &str,
    serial: u64,
) -> Task<()> {
    let core_ref = Arc::downgrade(core);
    let timeout = core.config.connection_timeout;
    let key = key.clone();
    let device_id = device_id.to_owned();

    core.event_loop().spawn(async move {
        Timer::after(timeout).await;
        let Some(core) = core_ref.upgrade() else {
            return;
        };

        let _ = core.run(move |registry, core| {
            let Ok(entry) = registry.adapter(&key) else {
                return;
            };
            let timer = fail_connection(
                entry,
                core,
                &device_id,
                Some(serial),
                ErrorKind::Timeout.into(),
            );
            // Cancelling would drop the task that is running this very closure.
            if let Some(timer) = timer {
                timer.detach();
            }
        });
    })
}

/// Ends a connection attempt that is still `Connecting`, reporting `error` to its handler.
///
/// With `serial` set, only that attempt is failed. Returns the attempt's timer so the caller
/// can decide how to disarm it.
fn fail_connection(
    entry: &mut AdapterEntry,
    core: &Arc<Core>,
    device_id: &str,
    serial: Option<u64>,
    error: Error,
) -> Option<Task<()>> {
    let device = entry.devices.get_mut(device_id)?;
    if device.state() != DeviceState::Connecting {
        debug!("{device_id}: not connecting, ignoring {error}");
        return None;
    }

    let mut connection = device
        .connection
        .take_if(|connection| serial.is_none_or(|serial| connection.serial == serial))?;
    let address = device.address().to_owned();

    let timer = connection.timer.take();
    // Handlers are only registered on established links.
    for queue in connection.teardown() {
        queue.close();
    }
    if let Err(err) = entry.set_device_state(device_id, &address, DeviceState::Disconnected) {
        warn!("{address}: {err}");
    }
    debug!("{address}: connection failed: {error}");
    core.signal.notify();

    if let Some(handler) = connection.on_connect.take() {
        dispatch::spawn_oneshot(Event::Connected(handler, Err(error)));
    }
    timer
}

/// Fails every connection attempt still in progress with `AdapterClosed`.
pub(crate) fn abort_pending(registry: &mut Registry, core: &Arc<Core>) {
    for entry in registry.adapters_mut() {
        for device_id in entry.devices.connecting() {
            let error = ErrorKind::AdapterClosed.into();
            drop(fail_connection(entry, core, &device_id, None, error));
        }
    }
}

pub(crate) fn on_connected(registry: &mut Registry, core: &Arc<Core>, adapter: &str, device_id: &str) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: connection on unknown adapter");
        return;
    };
    let key = entry.key();
    let name = entry.info.name.clone();

    let Some(device) = entry.devices.get_mut(device_id) else {
        warn!("{device_id}: connection of unknown device");
        return;
    };
    if device.state() != DeviceState::Connecting {
        warn!("{device_id}: ignoring connection while {}", device.state());
        return;
    }
    let address = device.address().to_owned();
    let Some(connection) = device.connection.as_mut() else {
        warn!("{device_id}: connecting without a connection");
        return;
    };

    // Disarm first: the timer may already be queued behind this event.
    drop(connection.timer.take());
    let handler = connection.on_connect.take();
    let serial = connection.serial;

    if let Err(err) = entry.set_device_state(device_id, &address, DeviceState::Connected) {
        warn!("{address}: {err}");
        return;
    }
    debug!("{address}: connected");

    if let Some(handler) = handler {
        let connection = Connection {
            adapter: Adapter::new(core.clone(), key, name),
            device_id: device_id.to_owned(),
            address,
            serial,
        };
        dispatch::spawn_oneshot(Event::Connected(handler, Ok(connection)));
    }
}

pub(crate) fn on_connect_failed(
    registry: &mut Registry,
    core: &Arc<Core>,
    adapter: &str,
    device_id: &str,
    error: Error,
) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: connection failure on unknown adapter");
        return;
    };
    drop(fail_connection(entry, core, device_id, None, error));
}

pub(crate) fn on_disconnected(
    registry: &mut Registry,
    core: &Arc<Core>,
    adapter: &str,
    device_id: &str,
) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: disconnection on unknown adapter");
        return;
    };
    let key = entry.key();
    let name = entry.info.name.clone();

    let Some(device) = entry.devices.get_mut(device_id) else {
        warn!("{device_id}: disconnection of unknown device");
        return;
    };
    match device.state() {
        DeviceState::Connecting => {
            let error = ErrorKind::DeviceDisconnected.into();
            drop(fail_connection(entry, core, device_id, None, error));
            return;
        }
        DeviceState::Connected | DeviceState::Disconnecting => (),
        state => {
            debug!("{device_id}: ignoring disconnection while {state}");
            return;
        }
    }

    let address = device.address().to_owned();
    let Some(mut connection) = device.connection.take() else {
        warn!("{device_id}: active without a connection");
        return;
    };

    let queues = connection.teardown();
    if let Err(err) = entry.set_device_state(device_id, &address, DeviceState::Disconnected) {
        warn!("{address}: {err}");
    }
    debug!("{address}: disconnected");
    core.signal.notify();

    if let Some(handler) = connection.on_disconnect.take() {
        let connection = Connection {
            adapter: Adapter::new(core.clone(), key, name),
            device_id: device_id.to_owned(),
            address,
            serial: connection.serial,
        };
        dispatch::spawn_after(queues, Event::Disconnected(handler, connection));
    } else {
        for queue in queues {
            queue.close();
        }
    }
}

impl Connection {
    pub(crate) fn core(&self) -> &Arc<Core> {
        self.adapter.core()
    }

    /// The adapter the connection was made through.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// The Bluetooth address of the connected device.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The platform identifier of the connected device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns `true` until the connection has been torn down.
    pub fn is_valid(&self) -> bool {
        let connection = self.clone();
        self.core()
            .run(move |registry, _| connection.entry(registry).is_ok())
            .unwrap_or(false)
    }

    /// Returns `true` while the device is in the connected state.
    pub fn is_connected(&self) -> bool {
        let connection = self.clone();
        self.core()
            .run(move |registry, _| {
                connection.entry(registry).is_ok_and(|entry| {
                    entry.devices.state(&connection.device_id) == DeviceState::Connected
                })
            })
            .unwrap_or(false)
    }

    /// Asks the platform to disconnect.
    ///
    /// Teardown happens when the platform confirms the disconnection. With `wait` set this
    /// blocks until then, and fails with [`ErrorKind::Timeout`] if confirmation does not arrive
    /// within the configured disconnection wait timeout.
    pub fn disconnect(&self, wait: bool) -> Result<()> {
        let connection = self.clone();
        self.core().run(move |registry, _| -> Result<()> {
            let entry = connection.entry(registry)?;
            let state = entry.devices.state(&connection.device_id);
            if state != DeviceState::Connected {
                debug!("{}: cannot disconnect while {state}", connection.address);
                return Err(ErrorKind::Busy.into());
            }

            entry
                .connection_mut(&connection.device_id)
                .ok_or(ErrorKind::Unexpected)?
                .session()
                .disconnect()?;
            entry.set_device_state(
                &connection.device_id,
                &connection.address,
                DeviceState::Disconnecting,
            )
        })??;

        if !wait {
            return Ok(());
        }

        let connection = self.clone();
        let timeout = self.core().config.disconnection_wait_timeout;
        if self
            .core()
            .wait_for(Some(timeout), move || !connection.is_valid())?
        {
            Ok(())
        } else {
            debug!("{}: disconnection not confirmed in {timeout:?}", self.address);
            Err(ErrorKind::Timeout.into())
        }
    }

    /// Registers the handler called once the connection goes away.
    pub fn register_disconnect_handler(&self, handler: impl DisconnectHandler) -> Result<()> {
        let handler: Box<dyn DisconnectHandler> = Box::new(handler);
        self.with_connection(move |connection| {
            connection.on_disconnect = Some(handler);
            Ok(())
        })
    }

    /// The adapter entry owning this connection, if the connection is still live.
    pub(crate) fn entry<'r>(&self, registry: &'r mut Registry) -> Result<&'r mut AdapterEntry> {
        let entry = registry
            .adapter(self.adapter.key())
            .map_err(|_| Error::from(ErrorKind::DeviceDisconnected))?;

        let live = entry
            .devices
            .get(&self.device_id)
            .and_then(|device| device.connection.as_ref())
            .is_some_and(|connection| connection.serial == self.serial);
        if live {
            Ok(entry)
        } else {
            Err(ErrorKind::DeviceDisconnected.into())
        }
    }

    /// Runs `func` against the live connection entry on the event loop.
    pub(crate) fn with_connection<R>(
        &self,
        func: impl FnOnce(&mut ConnectionEntry) -> Result<R> + Send + 'static,
    ) -> Result<R>
    where
        R: Send + 'static,
    {
        let connection = self.clone();
        self.core().run(move |registry, _| -> Result<R> {
            let entry = connection.entry(registry)?;
            func(
                entry
                    .connection_mut(&connection.device_id)
                    .ok_or(ErrorKind::Unexpected)?,
            )
        })?
    }

    /// Issues a request on the session of a connected device.
    pub(crate) fn with_session<T>(
        &self,
        func: impl FnOnce(&mut dyn GattSession, Reply<T>) + Send + 'static,
    ) -> Result<Completion<T>>
    where
        T: Send + 'static,
    {
        let (reply, completion) = sync::completion();
        let connection = self.clone();
        self.core().run(move |registry, _| -> Result<()> {
            let entry = connection.entry(registry)?;
            if entry.devices.state(&connection.device_id) != DeviceState::Connected {
                return Err(ErrorKind::NotConnected.into());
            }
            let session = entry
                .connection_mut(&connection.device_id)
                .ok_or(ErrorKind::Unexpected)?
                .session();
            func(session, reply);
            Ok(())
        })??;
        Ok(completion)
    }

    /// Blocks on a request, bounded by the configured request timeout.
    pub(crate) fn wait<T>(&self, completion: Completion<T>) -> Result<T> {
        self.core()
            .wait(completion, self.core().config.request_timeout)
    }
}
