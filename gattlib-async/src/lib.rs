//! An asynchronous wrapper for the `gattlib` crate.
//!
//! This crate provides `async` functions and streams on top of the blocking and callback based
//! API of `gattlib`. Futures resolve from the `gattlib` event loop, so they can be awaited from
//! any executor.
//!
//! See the `examples` directory for more complete usage examples.

mod adapter;
mod connection;
pub mod error;
mod util;

pub use adapter::*;
pub use connection::*;
pub use gattlib::{
    Characteristic, CharacteristicProperties, Config, ConnectOptions, Descriptor,
    DiscoveryFilter, Gattlib, HandleRange, PrimaryService, SimulatedPlatform, SubscriptionKind,
    WriteType, advertisement_data, platform, simulated,
};
pub use util::BroadcastReceiver;
