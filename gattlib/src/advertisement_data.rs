//! What a device broadcasts about itself while scanning.

use std::collections::HashMap;

use btuuid::BluetoothUuid;

/// The advertising and scan response payload last seen for a device.
///
/// Every field is optional on the air. The platform fills in what it decoded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    /// Complete or shortened local name.
    pub local_name: Option<String>,
    pub manufacturer_data: Option<ManufacturerData>,
    /// Payloads keyed by the service they belong to.
    pub service_data: HashMap<BluetoothUuid, Vec<u8>>,
    /// Services listed in the advertisement, of any width.
    pub service_uuids: Vec<BluetoothUuid>,
    /// TX power in dBm.
    pub tx_power_level: Option<i16>,
    pub is_connectable: bool,
}

impl AdvertisementData {
    /// Returns `true` if the advertisement lists a service matching `uuid`, in either its service
    /// UUID list or its service data.
    pub fn advertises(&self, uuid: &BluetoothUuid) -> bool {
        self.service_uuids
            .iter()
            .chain(self.service_data.keys())
            .any(|advertised| crate::uuid::matches(advertised, uuid))
    }
}

/// A manufacturer-specific AD structure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManufacturerData {
    /// The Bluetooth SIG assigned company identifier.
    pub company_id: u16,
    pub data: Vec<u8>,
}

impl ManufacturerData {
    /// Splits a raw manufacturer-specific AD structure into its little-endian company identifier
    /// and payload. Returns `None` if it is too short to hold an identifier.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [lo, hi, data @ ..] => Some(Self {
                company_id: u16::from_le_bytes([*lo, *hi]),
                data: data.to_vec(),
            }),
            _ => None,
        }
    }
}
