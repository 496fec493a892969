//! GATT attribute types and the request operations of a [`Connection`].

use std::fmt::Display;

use bitflags::bitflags;
use btuuid::BluetoothUuid;

use crate::connection::Connection;
use crate::error::Result;
use crate::sync::Completion;

/// An inclusive range of attribute handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    /// Every attribute handle on the server.
    pub const ALL: HandleRange = HandleRange {
        start: 0x0001,
        end: 0xffff,
    };

    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start..=self.end).contains(&handle)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Display for HandleRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}..=0x{:04x}", self.start, self.end)
    }
}

/// A primary service and the handles it spans.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryService {
    pub handles: HandleRange,
    pub uuid: BluetoothUuid,
}

bitflags! {
    /// The properties of a characteristic, as found in its declaration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESP = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A characteristic declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    /// The handle of the declaration itself.
    pub handle: u16,
    pub properties: CharacteristicProperties,
    /// The handle holding the characteristic's value.
    pub value_handle: u16,
    pub uuid: BluetoothUuid,
}

/// A characteristic descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: BluetoothUuid,
}

/// Whether a write expects an acknowledgement from the peripheral.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    #[default]
    WithResponse,
    WithoutResponse,
}

/// The kind of unsolicited value update a subscription asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Notification,
    Indication,
}

impl Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKind::Notification => f.write_str("notification"),
            SubscriptionKind::Indication => f.write_str("indication"),
        }
    }
}

impl Connection {
    /// Discovers the primary services of the device.
    pub fn discover_primary_services(&self) -> Result<Vec<PrimaryService>> {
        self.wait(self.request_primary_services()?)
    }

    /// Discovers the characteristics declared within `range`.
    pub fn discover_characteristics(&self, range: HandleRange) -> Result<Vec<Characteristic>> {
        self.wait(self.request_characteristics(range)?)
    }

    /// Discovers every characteristic of the device.
    pub fn discover_all_characteristics(&self) -> Result<Vec<Characteristic>> {
        self.discover_characteristics(HandleRange::ALL)
    }

    /// Discovers the descriptors within `range`.
    pub fn discover_descriptors(&self, range: HandleRange) -> Result<Vec<Descriptor>> {
        self.wait(self.request_descriptors(range)?)
    }

    /// Discovers every descriptor of the device.
    pub fn discover_all_descriptors(&self) -> Result<Vec<Descriptor>> {
        self.discover_descriptors(HandleRange::ALL)
    }

    /// Reads the value of the characteristic identified by `uuid`.
    pub fn read_by_uuid(&self, uuid: &BluetoothUuid) -> Result<Vec<u8>> {
        self.wait(self.request_read(uuid)?)
    }

    /// Writes `data` to the characteristic identified by `uuid`.
    pub fn write_by_uuid(
        &self,
        uuid: &BluetoothUuid,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.wait(self.request_write(uuid, data, write_type)?)
    }

    /// Writes `data` to the characteristic identified by `uuid` without waiting for an acknowledgement.
    pub fn write_without_response_by_uuid(&self, uuid: &BluetoothUuid, data: &[u8]) -> Result<()> {
        self.write_by_uuid(uuid, data, WriteType::WithoutResponse)
    }

    /// Writes `data` to the characteristic value at `handle`, as found in
    /// [`Characteristic::value_handle`].
    pub fn write_by_handle(&self, handle: u16, data: &[u8], write_type: WriteType) -> Result<()> {
        self.wait(self.request_write_by_handle(handle, data, write_type)?)
    }

    pub fn write_without_response_by_handle(&self, handle: u16, data: &[u8]) -> Result<()> {
        self.write_by_handle(handle, data, WriteType::WithoutResponse)
    }

    pub fn request_primary_services(&self) -> Result<Completion<Vec<PrimaryService>>> {
        self.with_session(|session, reply| session.discover_primary_services(reply))
    }

    pub fn request_characteristics(
        &self,
        range: HandleRange,
    ) -> Result<Completion<Vec<Characteristic>>> {
        self.with_session(move |session, reply| session.discover_characteristics(range, reply))
    }

    pub fn request_descriptors(&self, range: HandleRange) -> Result<Completion<Vec<Descriptor>>> {
        self.with_session(move |session, reply| session.discover_descriptors(range, reply))
    }

    pub fn request_read(&self, uuid: &BluetoothUuid) -> Result<Completion<Vec<u8>>> {
        let uuid = uuid.clone();
        self.with_session(move |session, reply| session.read(&uuid, reply))
    }

    pub fn request_write(
        &self,
        uuid: &BluetoothUuid,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<Completion<()>> {
        let uuid = uuid.clone();
        let data = data.to_vec();
        self.with_session(move |session, reply| session.write(&uuid, data, write_type, reply))
    }

    pub fn request_write_by_handle(
        &self,
        handle: u16,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<Completion<()>> {
        let data = data.to_vec();
        self.with_session(move |session, reply| {
            session.write_by_handle(handle, data, write_type, reply)
        })
    }
}
