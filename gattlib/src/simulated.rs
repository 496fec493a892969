//! An in-process [`Platform`] with scripted peripherals.
//!
//! The simulated platform behaves like a BlueZ adapter with a fixed set of peripherals in range.
//! Tests and demos script it through [`SimulatedPlatform`]: peripherals can be added, made to
//! advertise, push notifications, drop their link or be forgotten, and their reaction to connect
//! and disconnect requests can be chosen per peripheral.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use btuuid::BluetoothUuid;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::advertisement_data::AdvertisementData;
use crate::config::{ConnectOptions, DiscoveryFilter};
use crate::error::{ErrorKind, Result};
use crate::gatt::{
    Characteristic, CharacteristicProperties, Descriptor, HandleRange, PrimaryService,
    SubscriptionKind, WriteType,
};
use crate::platform::{
    AdapterInfo, DiscoveredDevice, EventSink, GattSession, Platform, PlatformEvent,
};
use crate::sync::Reply;
use crate::uuid::{matches, to_uuid128};

/// The ATT MTU of a link that did not negotiate one.
const DEFAULT_MTU: u16 = 23;

/// How a peripheral answers a connection request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// The link comes up straight away.
    #[default]
    Accept,
    /// The link comes up after the given delay.
    AcceptAfter(Duration),
    /// The attempt fails with the given error.
    Reject(ErrorKind),
    /// Nothing happens; only the connection timeout ends the attempt.
    Ignore,
}

/// How a peripheral answers a disconnection request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    #[default]
    Acknowledge,
    /// The request is accepted but the disconnection is never confirmed.
    Ignore,
}

/// A characteristic of a simulated peripheral.
#[derive(Debug, Clone)]
pub struct SimCharacteristic {
    uuid: BluetoothUuid,
    properties: CharacteristicProperties,
    value: Vec<u8>,
    descriptors: Vec<BluetoothUuid>,
}

impl SimCharacteristic {
    pub fn new(uuid: BluetoothUuid, properties: CharacteristicProperties) -> Self {
        Self {
            uuid,
            properties,
            value: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_descriptor(mut self, uuid: BluetoothUuid) -> Self {
        self.descriptors.push(uuid);
        self
    }
}

/// A primary service of a simulated peripheral.
#[derive(Debug, Clone)]
pub struct SimService {
    uuid: BluetoothUuid,
    characteristics: Vec<SimCharacteristic>,
}

impl SimService {
    pub fn new(uuid: BluetoothUuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: SimCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

/// A scripted peripheral. Attribute handles are assigned when it is added to an adapter.
#[derive(Debug, Clone)]
pub struct Peripheral {
    address: String,
    name: Option<String>,
    rssi: Option<i16>,
    advertisement_data: AdvertisementData,
    services: Vec<SimService>,
    connect: ConnectBehavior,
    disconnect: DisconnectBehavior,
}

impl Peripheral {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi: None,
            advertisement_data: AdvertisementData {
                is_connectable: true,
                ..Default::default()
            },
            services: Vec::new(),
            connect: ConnectBehavior::default(),
            disconnect: DisconnectBehavior::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.advertisement_data.local_name = Some(name.clone());
        self.name = Some(name);
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_advertisement_data(mut self, advertisement_data: AdvertisementData) -> Self {
        self.advertisement_data = advertisement_data;
        self
    }

    /// Adds a service. Its UUID is also advertised.
    pub fn with_service(mut self, service: SimService) -> Self {
        if !self.advertisement_data.advertises(&service.uuid) {
            self.advertisement_data
                .service_uuids
                .push(service.uuid.clone());
        }
        self.services.push(service);
        self
    }

    pub fn with_connect_behavior(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }

    pub fn with_disconnect_behavior(mut self, behavior: DisconnectBehavior) -> Self {
        self.disconnect = behavior;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Idle,
    Pending(u64),
    Up(u64),
}

struct Value {
    declaration: Characteristic,
    value: Vec<u8>,
    writes: usize,
}

impl Value {
    fn write(&mut self, data: Vec<u8>, write_type: WriteType) -> Result<()> {
        let required = match write_type {
            WriteType::WithResponse => CharacteristicProperties::WRITE,
            WriteType::WithoutResponse => CharacteristicProperties::WRITE_WITHOUT_RESP,
        };
        if !self.declaration.properties.contains(required) {
            return Err(ErrorKind::NotSupported.into());
        }
        self.value = data;
        self.writes += 1;
        Ok(())
    }
}

struct Node {
    id: String,
    peripheral: Peripheral,
    services: Vec<PrimaryService>,
    values: Vec<Value>,
    descriptors: Vec<Descriptor>,
    link: Link,
    attempts: usize,
    subscriptions: HashSet<(Uuid, SubscriptionKind)>,
}

impl Node {
    fn new(adapter: &str, peripheral: Peripheral) -> Self {
        let mut services = Vec::new();
        let mut values = Vec::new();
        let mut descriptors = Vec::new();

        let mut handle = 0x0001u16;
        for service in &peripheral.services {
            let start = handle;
            handle += 1;
            for characteristic in &service.characteristics {
                values.push(Value {
                    declaration: Characteristic {
                        handle,
                        properties: characteristic.properties,
                        value_handle: handle + 1,
                        uuid: characteristic.uuid.clone(),
                    },
                    value: characteristic.value.clone(),
                    writes: 0,
                });
                handle += 2;
                for uuid in &characteristic.descriptors {
                    descriptors.push(Descriptor {
                        handle,
                        uuid: uuid.clone(),
                    });
                    handle += 1;
                }
            }
            services.push(PrimaryService {
                handles: HandleRange::new(start, handle - 1),
                uuid: service.uuid.clone(),
            });
        }

        Self {
            id: device_path(adapter, &peripheral.address),
            peripheral,
            services,
            values,
            descriptors,
            link: Link::Idle,
            attempts: 0,
            subscriptions: HashSet::new(),
        }
    }

    fn discovered(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            id: self.id.clone(),
            address: self.peripheral.address.clone(),
            name: self.peripheral.name.clone(),
            rssi: self.peripheral.rssi,
            advertisement_data: self.peripheral.advertisement_data.clone(),
        }
    }

    fn passes(&self, filter: &DiscoveryFilter) -> bool {
        let rssi_ok = filter
            .rssi_threshold
            .is_none_or(|threshold| self.peripheral.rssi.is_some_and(|rssi| rssi >= threshold));
        let uuid_ok = filter.uuids.is_empty()
            || filter
                .uuids
                .iter()
                .any(|uuid| self.peripheral.advertisement_data.advertises(uuid));
        rssi_ok && uuid_ok
    }

    fn value_mut(&mut self, uuid: &BluetoothUuid) -> Result<&mut Value> {
        self.values
            .iter_mut()
            .find(|value| matches(&value.declaration.uuid, uuid))
            .ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn value_by_handle(&mut self, handle: u16) -> Result<&mut Value> {
        self.values
            .iter_mut()
            .find(|value| value.declaration.value_handle == handle)
            .ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn reset_link(&mut self) {
        self.link = Link::Idle;
        self.subscriptions.clear();
    }
}

struct SimAdapter {
    info: AdapterInfo,
    open: bool,
    discovery: Option<DiscoveryFilter>,
    nodes: Vec<Node>,
}

impl SimAdapter {
    fn node(&mut self, address: &str) -> Result<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|node| node.peripheral.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn node_by_id(&mut self, id: &str) -> Result<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|node| node.id == id)
            .ok_or_else(|| ErrorKind::NotFound.into())
    }
}

#[derive(Default)]
struct State {
    sink: Option<EventSink>,
    adapters: Vec<SimAdapter>,
    links: u64,
}

impl State {
    /// Finds an adapter by name or platform identifier.
    fn adapter(&mut self, adapter: &str) -> Result<&mut SimAdapter> {
        self.adapters
            .iter_mut()
            .find(|entry| entry.info.name == adapter || entry.info.id == adapter)
            .ok_or_else(|| ErrorKind::NotFound.into())
    }
}

/// An in-process Bluetooth stack. Cloning yields another handle to the same stack.
#[derive(Clone, Default)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for SimulatedPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedPlatform")
            .field(
                "adapters",
                &state
                    .adapters
                    .iter()
                    .map(|adapter| adapter.info.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `func` against the state, then emits the events it returned once the lock is released.
    fn update<R>(
        &self,
        func: impl FnOnce(&mut State) -> Result<(R, Vec<PlatformEvent>)>,
    ) -> Result<R> {
        let (res, events, sink) = {
            let mut state = self.lock();
            let (res, events) = func(&mut state)?;
            (res, events, state.sink.clone())
        };

        match sink {
            Some(sink) => events.into_iter().for_each(|event| sink.emit(event)),
            None if !events.is_empty() => trace!("not attached, dropping {} events", events.len()),
            None => (),
        }
        Ok(res)
    }

    /// Adds an adapter called `name`, with the identifier `/org/bluez/{name}`.
    pub fn add_adapter(&self, name: &str) {
        let mut state = self.lock();
        if state.adapter(name).is_ok() {
            return;
        }
        state.adapters.push(SimAdapter {
            info: AdapterInfo {
                id: format!("/org/bluez/{name}"),
                name: name.to_owned(),
            },
            open: false,
            discovery: None,
            nodes: Vec::new(),
        });
    }

    /// Puts `peripheral` in range of `adapter`. It is reported at once if the adapter is scanning.
    pub fn add_peripheral(&self, adapter: &str, peripheral: Peripheral) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            if adapter.node(&peripheral.address).is_ok() {
                return Err(ErrorKind::Busy.into());
            }

            let node = Node::new(&adapter.info.id, peripheral);
            let events = match &adapter.discovery {
                Some(filter) if node.passes(filter) => vec![PlatformEvent::DeviceDiscovered {
                    adapter: adapter.info.id.clone(),
                    device: node.discovered(),
                }],
                _ => Vec::new(),
            };
            adapter.nodes.push(node);
            Ok(((), events))
        })
    }

    /// Makes a peripheral advertise again, optionally with a new signal strength.
    pub fn advertise(&self, adapter: &str, address: &str, rssi: Option<i16>) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            let id = adapter.info.id.clone();
            let filter = adapter.discovery.clone();
            let node = adapter.node(address)?;
            if rssi.is_some() {
                node.peripheral.rssi = rssi;
            }

            let events = match filter {
                Some(filter) if node.passes(&filter) => vec![PlatformEvent::DeviceDiscovered {
                    adapter: id,
                    device: node.discovered(),
                }],
                _ => Vec::new(),
            };
            Ok(((), events))
        })
    }

    /// Pushes a new value of a characteristic, which is delivered once per active subscription.
    pub fn notify(
        &self,
        adapter: &str,
        address: &str,
        uuid: &BluetoothUuid,
        value: &[u8],
    ) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            let id = adapter.info.id.clone();
            let node = adapter.node(address)?;
            node.value_mut(uuid)?.value = value.to_vec();

            let key = to_uuid128(uuid);
            let events = [SubscriptionKind::Notification, SubscriptionKind::Indication]
                .into_iter()
                .filter(|kind| node.subscriptions.contains(&(key, *kind)))
                .map(|kind| PlatformEvent::ValueChanged {
                    adapter: id.clone(),
                    device: node.id.clone(),
                    uuid: uuid.clone(),
                    kind,
                    value: value.to_vec(),
                })
                .collect();
            Ok(((), events))
        })
    }

    /// Drops the link to a peripheral as if it went out of range.
    pub fn drop_link(&self, adapter: &str, address: &str) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            let id = adapter.info.id.clone();
            let node = adapter.node(address)?;
            if node.link == Link::Idle {
                return Err(ErrorKind::NotConnected.into());
            }

            node.reset_link();
            debug!("{}: link dropped", node.peripheral.address);
            Ok((
                (),
                vec![PlatformEvent::DeviceDisconnected {
                    adapter: id,
                    device: node.id.clone(),
                }],
            ))
        })
    }

    /// Reports that the stack forgot a peripheral. The peripheral stays in range.
    pub fn remove_device(&self, adapter: &str, address: &str) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            let id = adapter.info.id.clone();
            let node = adapter.node(address)?;
            Ok((
                (),
                vec![PlatformEvent::DeviceRemoved {
                    adapter: id,
                    device: node.id.clone(),
                }],
            ))
        })
    }

    pub fn set_connect_behavior(
        &self,
        adapter: &str,
        address: &str,
        behavior: ConnectBehavior,
    ) -> Result<()> {
        let mut state = self.lock();
        state.adapter(adapter)?.node(address)?.peripheral.connect = behavior;
        Ok(())
    }

    pub fn set_disconnect_behavior(
        &self,
        adapter: &str,
        address: &str,
        behavior: DisconnectBehavior,
    ) -> Result<()> {
        let mut state = self.lock();
        state.adapter(adapter)?.node(address)?.peripheral.disconnect = behavior;
        Ok(())
    }

    /// The current value of a characteristic.
    pub fn value(&self, adapter: &str, address: &str, uuid: &BluetoothUuid) -> Result<Vec<u8>> {
        let mut state = self.lock();
        Ok(state
            .adapter(adapter)?
            .node(address)?
            .value_mut(uuid)?
            .value
            .clone())
    }

    /// How many writes a characteristic has accepted.
    pub fn write_count(&self, adapter: &str, address: &str, uuid: &BluetoothUuid) -> Result<usize> {
        let mut state = self.lock();
        Ok(state.adapter(adapter)?.node(address)?.value_mut(uuid)?.writes)
    }

    /// How many times the library has asked to connect to a peripheral.
    pub fn connection_attempts(&self, adapter: &str, address: &str) -> Result<usize> {
        let mut state = self.lock();
        Ok(state.adapter(adapter)?.node(address)?.attempts)
    }

    /// Returns `true` while the adapter is held open by the library.
    pub fn is_open(&self, adapter: &str) -> bool {
        self.lock()
            .adapter(adapter)
            .is_ok_and(|adapter| adapter.open)
    }

    /// Returns `true` while the adapter is discovering.
    pub fn is_discovering(&self, adapter: &str) -> bool {
        self.lock()
            .adapter(adapter)
            .is_ok_and(|adapter| adapter.discovery.is_some())
    }

    fn complete_connection(&self, adapter: String, device: String, link: u64, delay: Duration) {
        let platform = self.clone();
        let res = thread::Builder::new()
            .name("gattlib-sim-link".to_owned())
            .spawn(move || {
                thread::sleep(delay);
                let res = platform.update(|state| {
                    let node = state.adapter(&adapter)?.node_by_id(&device)?;
                    if node.link != Link::Pending(link) {
                        trace!("{device}: attempt {link} abandoned");
                        return Ok(((), Vec::new()));
                    }
                    node.link = Link::Up(link);
                    Ok(((), vec![PlatformEvent::DeviceConnected { adapter, device }]))
                });
                if let Err(err) = res {
                    debug!("delayed connection failed: {err}");
                }
            });
        if let Err(err) = res {
            warn!("failed to spawn link thread: {err}");
        }
    }
}

impl Platform for SimulatedPlatform {
    fn attach(&self, sink: EventSink) {
        self.lock().sink = Some(sink);
    }

    fn open_adapter(&self, name: &str) -> Result<AdapterInfo> {
        let mut state = self.lock();
        let adapter = state.adapter(name)?;
        adapter.open = true;
        Ok(adapter.info.clone())
    }

    fn close_adapter(&self, adapter: &str) -> Result<()> {
        let mut state = self.lock();
        let adapter = state.adapter(adapter)?;
        adapter.open = false;
        adapter.discovery = None;
        Ok(())
    }

    fn start_discovery(&self, adapter: &str, filter: &DiscoveryFilter) -> Result<()> {
        self.update(|state| {
            let adapter = state.adapter(adapter)?;
            if !adapter.open {
                return Err(ErrorKind::AdapterClosed.into());
            }
            adapter.discovery = Some(filter.clone());

            let events = adapter
                .nodes
                .iter()
                .filter(|node| node.passes(filter))
                .map(|node| PlatformEvent::DeviceDiscovered {
                    adapter: adapter.info.id.clone(),
                    device: node.discovered(),
                })
                .collect();
            Ok(((), events))
        })
    }

    fn stop_discovery(&self, adapter: &str) -> Result<()> {
        self.lock().adapter(adapter)?.discovery = None;
        Ok(())
    }

    fn device_id(&self, adapter: &str, address: &str) -> Result<String> {
        let mut state = self.lock();
        Ok(state.adapter(adapter)?.node(address)?.id.clone())
    }

    fn connect(
        &self,
        adapter: &str,
        device: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn GattSession>> {
        let (session, behavior) = self.update(|state| {
            state.links += 1;
            let link = state.links;
            let adapter = state.adapter(adapter)?;
            let adapter_id = adapter.info.id.clone();
            let node = adapter.node_by_id(device)?;
            node.attempts += 1;
            if node.link != Link::Idle {
                return Err(ErrorKind::Busy.into());
            }
            trace!("{device}: connecting with {options:?}");

            let behavior = node.peripheral.connect;
            let events = match behavior {
                ConnectBehavior::Accept => {
                    node.link = Link::Up(link);
                    vec![PlatformEvent::DeviceConnected {
                        adapter: adapter_id.clone(),
                        device: device.to_owned(),
                    }]
                }
                ConnectBehavior::Reject(kind) => vec![PlatformEvent::ConnectFailed {
                    adapter: adapter_id.clone(),
                    device: device.to_owned(),
                    error: kind.into(),
                }],
                ConnectBehavior::AcceptAfter(_) | ConnectBehavior::Ignore => {
                    node.link = Link::Pending(link);
                    Vec::new()
                }
            };

            let session = SimSession {
                platform: self.clone(),
                adapter: adapter_id,
                device: device.to_owned(),
                link,
                mtu: options.mtu.unwrap_or(DEFAULT_MTU),
            };
            Ok(((session, behavior), events))
        })?;

        if let ConnectBehavior::AcceptAfter(delay) = behavior {
            self.complete_connection(
                session.adapter.clone(),
                session.device.clone(),
                session.link,
                delay,
            );
        }
        Ok(Box::new(session))
    }

    fn advertisement_data(&self, adapter: &str, device: &str) -> Result<AdvertisementData> {
        let mut state = self.lock();
        Ok(state
            .adapter(adapter)?
            .node_by_id(device)?
            .peripheral
            .advertisement_data
            .clone())
    }
}

/// The GATT session of one connection attempt to a simulated peripheral.
struct SimSession {
    platform: SimulatedPlatform,
    adapter: String,
    device: String,
    link: u64,
    mtu: u16,
}

impl SimSession {
    /// Runs `func` against the peripheral if this session's link is still up.
    fn with_node<R>(&self, func: impl FnOnce(&mut Node) -> Result<R>) -> Result<R> {
        let mut state = self.platform.lock();
        let node = state.adapter(&self.adapter)?.node_by_id(&self.device)?;
        if node.link != Link::Up(self.link) {
            return Err(ErrorKind::DeviceDisconnected.into());
        }
        func(node)
    }
}

impl GattSession for SimSession {
    fn disconnect(&mut self) -> Result<()> {
        let adapter = self.adapter.clone();
        let link = self.link;
        self.platform.update(|state| {
            let node = state.adapter(&adapter)?.node_by_id(&self.device)?;
            if node.link != Link::Up(link) {
                return Err(ErrorKind::NotConnected.into());
            }

            match node.peripheral.disconnect {
                DisconnectBehavior::Acknowledge => {
                    node.reset_link();
                    Ok((
                        (),
                        vec![PlatformEvent::DeviceDisconnected {
                            adapter,
                            device: self.device.clone(),
                        }],
                    ))
                }
                DisconnectBehavior::Ignore => Ok(((), Vec::new())),
            }
        })
    }

    fn discover_primary_services(&mut self, reply: Reply<Vec<PrimaryService>>) {
        reply.send(self.with_node(|node| Ok(node.services.clone())));
    }

    fn discover_characteristics(&mut self, range: HandleRange, reply: Reply<Vec<Characteristic>>) {
        reply.send(self.with_node(|node| {
            Ok(node
                .values
                .iter()
                .filter(|value| range.contains(value.declaration.handle))
                .map(|value| value.declaration.clone())
                .collect())
        }));
    }

    fn discover_descriptors(&mut self, range: HandleRange, reply: Reply<Vec<Descriptor>>) {
        reply.send(self.with_node(|node| {
            Ok(node
                .descriptors
                .iter()
                .filter(|descriptor| range.contains(descriptor.handle))
                .cloned()
                .collect())
        }));
    }

    fn read(&mut self, uuid: &BluetoothUuid, reply: Reply<Vec<u8>>) {
        reply.send(self.with_node(|node| {
            let value = node.value_mut(uuid)?;
            if !value
                .declaration
                .properties
                .contains(CharacteristicProperties::READ)
            {
                return Err(ErrorKind::NotSupported.into());
            }
            Ok(value.value.clone())
        }));
    }

    fn write(
        &mut self,
        uuid: &BluetoothUuid,
        data: Vec<u8>,
        write_type: WriteType,
        reply: Reply<()>,
    ) {
        reply.send(self.with_node(|node| node.value_mut(uuid)?.write(data, write_type)));
    }

    fn write_by_handle(
        &mut self,
        handle: u16,
        data: Vec<u8>,
        write_type: WriteType,
        reply: Reply<()>,
    ) {
        reply.send(self.with_node(|node| node.value_by_handle(handle)?.write(data, write_type)));
    }

    fn acquire_write(&mut self, uuid: &BluetoothUuid, reply: Reply<u16>) {
        let mtu = self.mtu;
        reply.send(self.with_node(|node| {
            let value = node.value_mut(uuid)?;
            if !value
                .declaration
                .properties
                .contains(CharacteristicProperties::WRITE_WITHOUT_RESP)
            {
                return Err(ErrorKind::NotSupported.into());
            }
            Ok(mtu)
        }));
    }

    fn subscribe(&mut self, uuid: &BluetoothUuid, kind: SubscriptionKind, reply: Reply<()>) {
        reply.send(self.with_node(|node| {
            let required = match kind {
                SubscriptionKind::Notification => CharacteristicProperties::NOTIFY,
                SubscriptionKind::Indication => CharacteristicProperties::INDICATE,
            };
            if !node.value_mut(uuid)?.declaration.properties.contains(required) {
                return Err(ErrorKind::NotSupported.into());
            }
            node.subscriptions.insert((to_uuid128(uuid), kind));
            Ok(())
        }));
    }

    fn unsubscribe(&mut self, uuid: &BluetoothUuid, kind: SubscriptionKind, reply: Reply<()>) {
        reply.send(self.with_node(|node| {
            node.value_mut(uuid)?;
            node.subscriptions.remove(&(to_uuid128(uuid), kind));
            Ok(())
        }));
    }

    fn close(&mut self) {
        let mut state = self.platform.lock();
        let Ok(node) = state
            .adapter(&self.adapter)
            .and_then(|adapter| adapter.node_by_id(&self.device))
        else {
            return;
        };
        if matches!(node.link, Link::Pending(link) | Link::Up(link) if link == self.link) {
            node.reset_link();
        }
    }
}

/// The BlueZ object path of a device, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
fn device_path(adapter: &str, address: &str) -> String {
    format!(
        "{adapter}/dev_{}",
        address.to_ascii_uppercase().replace(':', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATTERY: BluetoothUuid = BluetoothUuid::from_u16(0x180f);
    const LEVEL: BluetoothUuid = BluetoothUuid::from_u16(0x2a19);
    const CCCD: BluetoothUuid = BluetoothUuid::from_u16(0x2902);

    fn battery() -> Peripheral {
        Peripheral::new("aa:bb:cc:dd:ee:ff").with_rssi(-60).with_service(
            SimService::new(BATTERY).with_characteristic(
                SimCharacteristic::new(
                    LEVEL,
                    CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                )
                .with_value([80])
                .with_descriptor(CCCD),
            ),
        )
    }

    #[test]
    fn handles_are_laid_out_in_order() {
        let node = Node::new("/org/bluez/hci0", battery());
        assert_eq!(node.id, "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
        assert_eq!(node.services[0].handles, HandleRange::new(1, 4));
        assert_eq!(node.values[0].declaration.handle, 2);
        assert_eq!(node.values[0].declaration.value_handle, 3);
        assert_eq!(node.descriptors[0].handle, 4);
    }

    #[test]
    fn discovery_filter_applies_rssi_and_uuids() {
        let node = Node::new("/org/bluez/hci0", battery());
        assert!(node.passes(&DiscoveryFilter::default()));
        assert!(node.passes(&DiscoveryFilter::default().with_uuids([BluetoothUuid::from_u16(0x180f)])));
        assert!(!node.passes(&DiscoveryFilter::default().with_uuids([BluetoothUuid::from_u16(0x1800)])));
        assert!(node.passes(&DiscoveryFilter::default().with_rssi_threshold(-70)));
        assert!(!node.passes(&DiscoveryFilter::default().with_rssi_threshold(-50)));
    }

    #[test]
    fn peripherals_are_looked_up_by_name_or_id() {
        let platform = SimulatedPlatform::new();
        platform.add_adapter("hci1");
        platform.add_peripheral("hci1", battery()).unwrap();

        assert_eq!(
            platform.device_id("/org/bluez/hci1", "AA:BB:CC:DD:EE:FF").unwrap(),
            "/org/bluez/hci1/dev_AA_BB_CC_DD_EE_FF"
        );
        assert_eq!(
            platform.add_peripheral("hci1", battery()).unwrap_err().kind(),
            ErrorKind::Busy
        );
        assert_eq!(
            platform.device_id("hci2", "AA:BB:CC:DD:EE:FF").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(platform.value("hci1", "aa:bb:cc:dd:ee:ff", &LEVEL).unwrap(), [80]);
    }
}
