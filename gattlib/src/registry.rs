//! The state owned by the event loop, and the routing of platform events into it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{self, AdapterEntry, AdapterKey};
use crate::connection;
use crate::context::Core;
use crate::error::{ErrorKind, Result};
use crate::notification;
use crate::platform::PlatformEvent;

/// Every open adapter, with its devices and their connections.
///
/// Only ever touched from the event loop thread.
#[derive(Default)]
pub(crate) struct Registry {
    adapters: HashMap<String, AdapterEntry>,
    serial: u64,
}

impl Registry {
    /// A number never handed out before by this registry.
    pub(crate) fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    /// The adapter opened as `key`, failing with `AdapterClosed` once it has been closed.
    pub(crate) fn adapter(&mut self, key: &AdapterKey) -> Result<&mut AdapterEntry> {
        match self.adapters.get_mut(&key.id) {
            Some(entry) if entry.serial() == key.serial => Ok(entry),
            _ => Err(ErrorKind::AdapterClosed.into()),
        }
    }

    pub(crate) fn adapter_by_id(&mut self, id: &str) -> Option<&mut AdapterEntry> {
        self.adapters.get_mut(id)
    }

    pub(crate) fn adapter_by_name(&mut self, name: &str) -> Option<&mut AdapterEntry> {
        self.adapters
            .values_mut()
            .find(|entry| entry.info.name == name || entry.info.id == name)
    }

    pub(crate) fn adapters_mut(&mut self) -> impl Iterator<Item = &mut AdapterEntry> {
        self.adapters.values_mut()
    }

    pub(crate) fn insert(&mut self, entry: AdapterEntry) {
        self.adapters.insert(entry.info.id.clone(), entry);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<AdapterEntry> {
        self.adapters.remove(id)
    }
}

pub(crate) fn handle_event(registry: &mut Registry, core: &Arc<Core>, event: PlatformEvent) {
    match event {
        PlatformEvent::DeviceDiscovered { adapter, device } => {
            adapter::on_discovered(registry, &adapter, device)
        }
        PlatformEvent::DeviceConnected { adapter, device } => {
            connection::on_connected(registry, core, &adapter, &device)
        }
        PlatformEvent::ConnectFailed {
            adapter,
            device,
            error,
        } => connection::on_connect_failed(registry, core, &adapter, &device, error),
        PlatformEvent::DeviceDisconnected { adapter, device } => {
            connection::on_disconnected(registry, core, &adapter, &device)
        }
        PlatformEvent::DeviceRemoved { adapter, device } => {
            adapter::on_removed(registry, &adapter, &device)
        }
        PlatformEvent::ValueChanged {
            adapter,
            device,
            uuid,
            kind,
            value,
        } => notification::on_value_changed(registry, &adapter, &device, uuid, kind, value),
    }
}
