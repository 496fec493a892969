//! A Bluetooth Low Energy GATT client core.
//!
//! This crate manages the lifecycle of local adapters, remote devices and the connections to
//! them on top of a platform Bluetooth service. All registry state lives on a single event loop
//! thread; application threads reach it by message passing and block on one-shot completions,
//! so blocking calls such as [`Adapter::connect_sync()`] never pump the event loop themselves.
//!
//! The platform is abstracted behind the [`Platform`] and [`GattSession`] traits. An in-process
//! [`SimulatedPlatform`] is included for tests and demos.
//!
//! ```
//! # use gattlib::{Config, ConnectOptions, Gattlib};
//! # use gattlib::simulated::Peripheral;
//! let (gattlib, platform) = Gattlib::simulated(Config::default()).unwrap();
//! platform.add_peripheral("hci0", Peripheral::new("AA:BB:CC:DD:EE:FF")).unwrap();
//!
//! let adapter = gattlib.adapter_open(None).unwrap();
//! let connection = adapter
//!     .connect_sync("AA:BB:CC:DD:EE:FF", ConnectOptions::default())
//!     .unwrap();
//! connection.disconnect(true).unwrap();
//! adapter.close().unwrap();
//! ```

mod adapter;
pub mod advertisement_data;
pub mod config;
mod connection;
mod context;
mod device;
mod dispatch;
pub mod eddystone;
pub mod error;
mod gatt;
mod notification;
pub mod platform;
mod registry;
pub mod simulated;
mod stream;
mod sync;
pub mod uuid;

pub use adapter::Adapter;
pub use config::{Config, ConnectOptions, DiscoveryFilter};
pub use connection::Connection;
pub use context::Gattlib;
pub use device::DeviceState;
pub use dispatch::{ConnectHandler, DisconnectHandler, DiscoveredHandler, NotificationHandler};
pub use error::{Error, ErrorKind, Result};
pub use gatt::*;
pub use platform::{GattSession, Platform};
pub use simulated::SimulatedPlatform;
pub use stream::CharacteristicWriter;
pub use sync::{Completion, Reply, completion};
