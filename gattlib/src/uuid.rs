//! Conversions between short Bluetooth UUIDs, full 128-bit UUIDs and their string forms.

use btuuid::{BluetoothUuid, BluetoothUuid32, BluetoothUuid128};
use uuid::Uuid;

use crate::error::{ErrorKind, Result};

/// The Bluetooth base UUID, `00000000-0000-1000-8000-00805F9B34FB`.
pub const BASE_UUID: Uuid = Uuid::from_u128(BluetoothUuid128::base().to_u128());

/// Expands `uuid` to its full 128-bit form.
pub fn to_uuid128(uuid: &BluetoothUuid) -> Uuid {
    Uuid::from_u128(uuid.to_u128())
}

/// Returns the shortest form of `uuid`: 16 or 32 bits if it is derived from the base UUID.
pub fn shorten(uuid: Uuid) -> BluetoothUuid {
    BluetoothUuid::from_u128(uuid.as_u128())
}

/// Compares two UUIDs regardless of the width they are stored in.
pub fn matches(a: &BluetoothUuid, b: &BluetoothUuid) -> bool {
    a.to_u128() == b.to_u128()
}

/// Formats `uuid` the way gattlib does: `0x180f`, `0x0000fe59` or the hyphenated 128-bit form.
pub fn to_string(uuid: &BluetoothUuid) -> String {
    match uuid {
        BluetoothUuid::Uuid16(short) => format!("0x{:04x}", short.to_u16()),
        BluetoothUuid::Uuid32(short) => format!("0x{:08x}", short.to_u32()),
        BluetoothUuid::Uuid128(full) => Uuid::from_u128(full.to_u128()).hyphenated().to_string(),
    }
}

/// Parses a UUID in any of the forms produced by [`to_string`], with or without the `0x` prefix.
///
/// The width is kept as written, so `0x0000fe59` stays a 32-bit UUID.
pub fn parse(s: &str) -> Result<BluetoothUuid> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    match hex.len() {
        1..=4 => u16::from_str_radix(hex, 16)
            .map(BluetoothUuid::from_u16)
            .map_err(|_| ErrorKind::InvalidParameter.into()),
        5..=8 => u32::from_str_radix(hex, 16)
            .map(|short| BluetoothUuid::Uuid32(BluetoothUuid32::new(short)))
            .map_err(|_| ErrorKind::InvalidParameter.into()),
        _ => Uuid::parse_str(hex)
            .map(|full| BluetoothUuid::Uuid128(BluetoothUuid128::new(full.as_u128())))
            .map_err(|_| ErrorKind::InvalidParameter.into()),
    }
}
