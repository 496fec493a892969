//! Eddystone beacons.
//!
//! Eddystone frames travel as service data of the 16-bit service `0xFEAA`. The first byte of
//! the payload selects the frame type.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use btuuid::BluetoothUuid;
use tracing::trace;

use crate::adapter::Adapter;
use crate::config::DiscoveryFilter;
use crate::error::Result;
use crate::platform::DiscoveredDevice;
use crate::uuid::matches;

/// The service Eddystone frames are advertised under.
pub const EDDYSTONE_SERVICE: BluetoothUuid = BluetoothUuid::from_u16(0xfeaa);

const FRAME_UID: u8 = 0x00;
const FRAME_URL: u8 = 0x10;
const FRAME_TLM: u8 = 0x20;
const FRAME_EID: u8 = 0x30;

const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

const URL_EXPANSIONS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu", ".net",
    ".info", ".biz", ".gov",
];

bitflags! {
    /// A set of Eddystone frame types.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EddystoneTypes: u8 {
        const UID = 1 << 0;
        const URL = 1 << 1;
        const TLM = 1 << 2;
        const EID = 1 << 3;
    }
}

/// A decoded Eddystone frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EddystoneFrame {
    /// A static beacon identity.
    Uid {
        /// Calibrated TX power at 0 m, in dBm.
        tx_power: i8,
        namespace: [u8; 10],
        instance: [u8; 6],
    },
    Url {
        tx_power: i8,
        url: String,
    },
    /// Unencrypted telemetry.
    Tlm {
        /// Battery voltage in mV, 0 if not supported.
        battery_mv: u16,
        /// Temperature in 1/256 °C, `-128 * 256` if not supported.
        temperature: i16,
        /// Frames advertised since power-up.
        advertisements: u32,
        /// Time since power-up, in 0.1 s.
        uptime: u32,
    },
    /// An ephemeral, rotating identifier.
    Eid {
        tx_power: i8,
        eid: [u8; 8],
    },
}

impl EddystoneFrame {
    /// Decodes the service data of an Eddystone advertisement. Returns `None` for unknown frame
    /// types, encrypted telemetry and truncated frames.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [FRAME_UID, tx_power, rest @ ..] if rest.len() >= 16 => Some(EddystoneFrame::Uid {
                tx_power: *tx_power as i8,
                namespace: rest[..10].try_into().ok()?,
                instance: rest[10..16].try_into().ok()?,
            }),
            [FRAME_URL, tx_power, scheme, encoded @ ..] => Some(EddystoneFrame::Url {
                tx_power: *tx_power as i8,
                url: decode_url(*scheme, encoded)?,
            }),
            [FRAME_TLM, 0x00, rest @ ..] if rest.len() >= 12 => Some(EddystoneFrame::Tlm {
                battery_mv: u16::from_be_bytes([rest[0], rest[1]]),
                temperature: i16::from_be_bytes([rest[2], rest[3]]),
                advertisements: u32::from_be_bytes(rest[4..8].try_into().ok()?),
                uptime: u32::from_be_bytes(rest[8..12].try_into().ok()?),
            }),
            [FRAME_EID, tx_power, rest @ ..] if rest.len() >= 8 => Some(EddystoneFrame::Eid {
                tx_power: *tx_power as i8,
                eid: rest[..8].try_into().ok()?,
            }),
            _ => None,
        }
    }

    pub fn frame_type(&self) -> EddystoneTypes {
        match self {
            EddystoneFrame::Uid { .. } => EddystoneTypes::UID,
            EddystoneFrame::Url { .. } => EddystoneTypes::URL,
            EddystoneFrame::Tlm { .. } => EddystoneTypes::TLM,
            EddystoneFrame::Eid { .. } => EddystoneTypes::EID,
        }
    }

    /// Finds and decodes the Eddystone frame in a device's advertisement, if it has one.
    pub fn from_device(device: &DiscoveredDevice) -> Option<Self> {
        device
            .advertisement_data
            .service_data
            .iter()
            .find(|(uuid, _)| matches(uuid, &EDDYSTONE_SERVICE))
            .and_then(|(_, data)| Self::parse(data))
    }
}

fn decode_url(scheme: u8, encoded: &[u8]) -> Option<String> {
    let mut url = URL_SCHEMES.get(usize::from(scheme))?.to_string();
    for &byte in encoded {
        match URL_EXPANSIONS.get(usize::from(byte)) {
            Some(expansion) => url.push_str(expansion),
            None if byte.is_ascii_graphic() => url.push(char::from(byte)),
            None => return None,
        }
    }
    Some(url)
}

/// Called for each Eddystone beacon found while scanning.
pub trait EddystoneHandler: Send + Sync + 'static {
    fn on_eddystone(&self, device: &DiscoveredDevice, frame: &EddystoneFrame);
}

impl<F: Fn(&DiscoveredDevice, &EddystoneFrame) + Send + Sync + 'static> EddystoneHandler for F {
    fn on_eddystone(&self, device: &DiscoveredDevice, frame: &EddystoneFrame) {
        self(device, frame)
    }
}

impl Adapter {
    /// Scans for Eddystone beacons until `timeout` elapses or the scan is disabled from another
    /// thread.
    ///
    /// `handler` sees every beacon whose frame type is in `types`. With `rssi_threshold` set,
    /// beacons heard below it are ignored. Beacons change their frames over time, so each is
    /// reported again whenever its advertisement changes.
    pub fn scan_eddystone(
        &self,
        types: EddystoneTypes,
        rssi_threshold: Option<i16>,
        handler: impl EddystoneHandler,
        timeout: Duration,
    ) -> Result<()> {
        let mut filter = DiscoveryFilter::default()
            .with_uuids([EDDYSTONE_SERVICE])
            .with_notify_change(true);
        filter.rssi_threshold = rssi_threshold;

        let handler = Arc::new(handler);
        self.scan_enable(
            move |device: &DiscoveredDevice| match EddystoneFrame::from_device(device) {
                Some(frame) if types.contains(frame.frame_type()) => {
                    handler.on_eddystone(device, &frame)
                }
                Some(frame) => trace!("{}: ignoring {:?} frame", device.address, frame.frame_type()),
                None => trace!("{}: no Eddystone frame", device.address),
            },
            timeout,
            filter,
        )
    }
}
