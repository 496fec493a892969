//! The per-adapter device table and the device lifecycle state machine.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::{debug, warn};

use crate::advertisement_data::AdvertisementData;
use crate::connection::ConnectionEntry;
use crate::error::{ErrorKind, Result};

/// The lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    /// The device is not in the adapter's table.
    NotFound,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl DeviceState {
    /// Returns `true` for the states in which the device owns a connection.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DeviceState::Connecting | DeviceState::Connected | DeviceState::Disconnecting
        )
    }

    fn allows(self, next: DeviceState) -> bool {
        use DeviceState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::NotFound => f.write_str("NOT_FOUND"),
            DeviceState::Disconnected => f.write_str("DISCONNECTED"),
            DeviceState::Connecting => f.write_str("CONNECTING"),
            DeviceState::Connected => f.write_str("CONNECTED"),
            DeviceState::Disconnecting => f.write_str("DISCONNECTING"),
        }
    }
}

/// How a state change affected the references a device holds on its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdapterRef {
    Unchanged,
    Acquired,
    Released,
}

pub(crate) struct Device {
    id: String,
    address: String,
    state: DeviceState,
    refs: usize,
    pub(crate) name: Option<String>,
    pub(crate) rssi: Option<i16>,
    pub(crate) advertisement_data: AdvertisementData,
    pub(crate) connection: Option<ConnectionEntry>,
}

impl Device {
    fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_owned(),
            address: address.to_owned(),
            state: DeviceState::Disconnected,
            refs: 1,
            name: None,
            rssi: None,
            advertisement_data: AdvertisementData::default(),
            connection: None,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.state
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.refs
    }
}

/// The devices owned by one adapter, keyed by their platform identifier.
#[derive(Default)]
pub(crate) struct Devices {
    entries: HashMap<String, Device>,
}

impl Devices {
    pub(crate) fn get(&self, id: &str) -> Option<&Device> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.entries.get_mut(id)
    }

    pub(crate) fn find_by_address(&self, address: &str) -> Option<&Device> {
        self.entries
            .values()
            .find(|device| device.address.eq_ignore_ascii_case(address))
    }

    pub(crate) fn state(&self, id: &str) -> DeviceState {
        self.entries
            .get(id)
            .map_or(DeviceState::NotFound, |device| device.state)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The identifiers of the devices with a connection attempt in progress.
    pub(crate) fn connecting(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|device| device.state == DeviceState::Connecting)
            .map(|device| device.id.clone())
            .collect()
    }

    pub(crate) fn all_disconnected(&self) -> bool {
        self.entries
            .values()
            .all(|device| device.state == DeviceState::Disconnected)
    }

    /// Drives the device identified by `id` to `next`.
    ///
    /// A device is created (with one reference) the first time it is set to `Disconnected` and
    /// removed when set to `NotFound`, which is only accepted from `Disconnected`. Leaving
    /// `Disconnected` takes a reference on the device and one on its adapter; returning to it
    /// releases both.
    pub(crate) fn set_state(
        &mut self,
        id: &str,
        address: &str,
        next: DeviceState,
    ) -> Result<AdapterRef> {
        let Some(device) = self.entries.get_mut(id) else {
            return match next {
                DeviceState::NotFound => {
                    debug!("{id}: no state to set");
                    Ok(AdapterRef::Unchanged)
                }
                DeviceState::Disconnected => {
                    debug!("{id}: set initial state {next}");
                    self.entries.insert(id.to_owned(), Device::new(id, address));
                    Ok(AdapterRef::Unchanged)
                }
                _ => {
                    warn!("{id}: cannot enter {next} before the device is known");
                    Err(ErrorKind::Unexpected.into())
                }
            };
        };

        let current = device.state;
        if current == next {
            debug!("{id}: already {next}");
            return Ok(AdapterRef::Unchanged);
        }

        if next == DeviceState::NotFound {
            if current != DeviceState::Disconnected {
                warn!("{id}: {current} device cannot be removed, ignoring");
                return Err(ErrorKind::Unexpected.into());
            }

            if device.refs != 1 {
                warn!("{id}: device has {} references, keeping it", device.refs);
                return Err(ErrorKind::Unexpected.into());
            }

            debug!("{id}: free device");
            self.entries.remove(id);
            return Ok(AdapterRef::Unchanged);
        }

        if !current.allows(next) {
            warn!("{id}: invalid transition {current} -> {next}");
            return Err(ErrorKind::Unexpected.into());
        }

        debug!("{id}: set state {current} -> {next}");
        device.state = next;

        if current == DeviceState::Disconnected {
            device.refs += 1;
            Ok(AdapterRef::Acquired)
        } else if next == DeviceState::Disconnected {
            device.refs -= 1;
            Ok(AdapterRef::Released)
        } else {
            Ok(AdapterRef::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF";
    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn connected() -> Devices {
        let mut devices = Devices::default();
        devices.set_state(ID, ADDRESS, DeviceState::Disconnected).unwrap();
        devices.set_state(ID, ADDRESS, DeviceState::Connecting).unwrap();
        devices.set_state(ID, ADDRESS, DeviceState::Connected).unwrap();
        devices
    }

    #[test]
    fn absent_device_is_created_disconnected() {
        let mut devices = Devices::default();
        assert_eq!(devices.state(ID), DeviceState::NotFound);
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::NotFound),
            Ok(AdapterRef::Unchanged)
        );
        assert_eq!(devices.len(), 0);

        devices.set_state(ID, ADDRESS, DeviceState::Disconnected).unwrap();
        let device = devices.get(ID).unwrap();
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert_eq!(device.reference_count(), 1);
        assert_eq!(device.address(), ADDRESS);
        assert!(devices.find_by_address("aa:bb:cc:dd:ee:ff").is_some());
    }

    #[test]
    fn connecting_must_come_first() {
        let mut devices = Devices::default();
        devices.set_state(ID, ADDRESS, DeviceState::Disconnected).unwrap();
        for next in [DeviceState::Connected, DeviceState::Disconnecting] {
            assert_eq!(
                devices.set_state(ID, ADDRESS, next).unwrap_err().kind(),
                ErrorKind::Unexpected
            );
            assert_eq!(devices.state(ID), DeviceState::Disconnected);
        }
        assert_eq!(
            devices
                .set_state("other", ADDRESS, DeviceState::Connected)
                .unwrap_err()
                .kind(),
            ErrorKind::Unexpected
        );
    }

    #[test]
    fn active_devices_cannot_be_removed() {
        let mut devices = Devices::default();
        devices.set_state(ID, ADDRESS, DeviceState::Disconnected).unwrap();
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::Connecting),
            Ok(AdapterRef::Acquired)
        );

        for state in [DeviceState::Connected, DeviceState::Disconnecting] {
            assert_eq!(
                devices.set_state(ID, ADDRESS, DeviceState::NotFound).unwrap_err().kind(),
                ErrorKind::Unexpected
            );
            devices.set_state(ID, ADDRESS, state).unwrap();
        }
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::NotFound).unwrap_err().kind(),
            ErrorKind::Unexpected
        );
        assert!(!devices.all_disconnected());
        assert_eq!(devices.get(ID).unwrap().reference_count(), 2);
    }

    #[test]
    fn full_lifecycle_releases_references() {
        let mut devices = connected();
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::Connected),
            Ok(AdapterRef::Unchanged)
        );
        devices.set_state(ID, ADDRESS, DeviceState::Disconnecting).unwrap();
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::Disconnected),
            Ok(AdapterRef::Released)
        );
        assert!(devices.all_disconnected());
        assert_eq!(devices.get(ID).unwrap().reference_count(), 1);

        devices.set_state(ID, ADDRESS, DeviceState::NotFound).unwrap();
        assert!(devices.get(ID).is_none());
    }

    #[test]
    fn failed_connection_returns_to_disconnected() {
        let mut devices = Devices::default();
        devices.set_state(ID, ADDRESS, DeviceState::Disconnected).unwrap();
        devices.set_state(ID, ADDRESS, DeviceState::Connecting).unwrap();
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::Disconnected),
            Ok(AdapterRef::Released)
        );
        assert_eq!(
            devices.set_state(ID, ADDRESS, DeviceState::Disconnecting).unwrap_err().kind(),
            ErrorKind::Unexpected
        );
    }
}
