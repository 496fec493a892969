//! The adapter registry and scanning.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use serial_executor::Task;
use tracing::{debug, trace, warn};

use crate::advertisement_data::AdvertisementData;
use crate::config::{Config, DiscoveryFilter};
use crate::connection::ConnectionEntry;
use crate::context::Core;
use crate::device::{AdapterRef, DeviceState, Devices};
use crate::dispatch::{self, DiscoveredHandler, Event};
use crate::error::{ErrorKind, Result};
use crate::platform::{AdapterInfo, DiscoveredDevice};
use crate::registry::Registry;

/// Identifies one opening of an adapter. A closed and reopened adapter gets a new serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AdapterKey {
    pub(crate) id: String,
    pub(crate) serial: u64,
}

struct Scan {
    serial: u64,
    handler: Arc<dyn DiscoveredHandler>,
    filter: DiscoveryFilter,
    seen: HashSet<String>,
    timer: Option<Task<()>>,
}

/// The registry record of an open adapter.
pub(crate) struct AdapterEntry {
    serial: u64,
    pub(crate) info: AdapterInfo,
    refs: usize,
    scan: Option<Scan>,
    pub(crate) devices: Devices,
}

impl AdapterEntry {
    fn new(info: AdapterInfo, serial: u64) -> Self {
        Self {
            serial,
            info,
            refs: 1,
            scan: None,
            devices: Devices::default(),
        }
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn key(&self) -> AdapterKey {
        AdapterKey {
            id: self.info.id.clone(),
            serial: self.serial,
        }
    }

    /// Moves a device to `state`, keeping the adapter's reference count in step with it.
    pub(crate) fn set_device_state(
        &mut self,
        device: &str,
        address: &str,
        state: DeviceState,
    ) -> Result<()> {
        match self.devices.set_state(device, address, state)? {
            AdapterRef::Acquired => self.refs += 1,
            AdapterRef::Released => self.refs -= 1,
            AdapterRef::Unchanged => (),
        }
        Ok(())
    }

    pub(crate) fn connection_mut(&mut self, device: &str) -> Option<&mut ConnectionEntry> {
        self.devices.get_mut(device)?.connection.as_mut()
    }

    fn stop_scan(&mut self, core: &Core) -> Option<Task<()>> {
        let scan = self.scan.take()?;
        if let Err(err) = core.platform.stop_discovery(&self.info.id) {
            warn!("{}: failed to stop discovery: {err}", self.info.id);
        }
        debug!(
            "{}: scan stopped after {} devices",
            self.info.id,
            scan.seen.len()
        );
        core.signal.notify();
        scan.timer
    }
}

/// A handle to an open Bluetooth adapter.
///
/// The handle stays usable until the adapter's reference count drops to zero through
/// [`close()`][Self::close] or [`release()`][Self::release]; after that every operation fails
/// with [`ErrorKind::AdapterClosed`]. Cloning the handle does not take a reference.
#[derive(Clone)]
pub struct Adapter {
    core: Arc<Core>,
    key: AdapterKey,
    name: String,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("id", &self.key.id)
            .field("name", &self.name)
            .finish()
    }
}

impl PartialEq for Adapter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core) && self.key == other.key
    }
}

impl Eq for Adapter {}

impl Hash for Adapter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

pub(crate) fn open(core: &Arc<Core>, name: Option<&str>) -> Result<Adapter> {
    let name = name.unwrap_or(&core.config.default_adapter).to_owned();
    if name.is_empty() {
        return Err(ErrorKind::InvalidParameter.into());
    }

    let requested = name.clone();
    let key = core.run(move |registry, core| -> Result<AdapterKey> {
        if let Some(entry) = registry.adapter_by_name(&requested) {
            entry.refs += 1;
            debug!("{}: reopened, {} references", entry.info.id, entry.refs);
            return Ok(entry.key());
        }

        let info = core.platform.open_adapter(&requested)?;
        let entry = AdapterEntry::new(info, registry.next_serial());
        debug!("{}: opened", entry.info.id);
        let key = entry.key();
        registry.insert(entry);
        Ok(key)
    })??;

    Ok(Adapter {
        core: core.clone(),
        key,
        name,
    })
}

fn release(registry: &mut Registry, core: &Core, key: &AdapterKey) -> Result<()> {
    let entry = registry.adapter(key)?;
    if entry.refs == 0 {
        warn!("{}: reference count underflow", key.id);
        return Err(ErrorKind::Unexpected.into());
    }

    entry.refs -= 1;
    if entry.refs > 0 {
        debug!("{}: released, {} references", key.id, entry.refs);
        return Ok(());
    }

    drop(entry.stop_scan(core));
    if let Err(err) = core.platform.close_adapter(&key.id) {
        warn!("{}: failed to close: {err}", key.id);
    }
    let freed = registry.remove(&key.id).map_or(0, |entry| entry.devices.len());
    debug!("{}: closed, freed {freed} devices", key.id);
    Ok(())
}

impl Adapter {
    pub(crate) fn new(core: Arc<Core>, key: AdapterKey, name: String) -> Self {
        Self { core, key, name }
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub(crate) fn key(&self) -> &AdapterKey {
        &self.key
    }

    /// The configuration of the library instance this adapter belongs to.
    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// The platform identifier of the adapter.
    pub fn id(&self) -> &str {
        &self.key.id
    }

    /// The name the adapter was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while the adapter is open.
    pub fn is_valid(&self) -> bool {
        let key = self.key.clone();
        self.core
            .run(move |registry, _| registry.adapter(&key).is_ok())
            .unwrap_or(false)
    }

    /// The number of outstanding references to the adapter, including one per active device.
    pub fn reference_count(&self) -> Result<usize> {
        let key = self.key.clone();
        self.core
            .run(move |registry, _| registry.adapter(&key).map(|entry| entry.refs))?
    }

    /// Takes another reference to the adapter.
    pub fn retain(&self) -> Result<Adapter> {
        let key = self.key.clone();
        self.core.run(move |registry, _| -> Result<()> {
            registry.adapter(&key)?.refs += 1;
            Ok(())
        })??;
        Ok(self.clone())
    }

    /// Drops one reference to the adapter, closing it when none remain.
    pub fn release(self) -> Result<()> {
        let key = self.key.clone();
        self.core
            .run(move |registry, core| release(registry, core, &key))?
    }

    /// Closes the adapter.
    ///
    /// Fails with [`ErrorKind::Busy`] while any of its devices is not disconnected. A scan in
    /// progress is stopped first.
    pub fn close(self) -> Result<()> {
        let key = self.key.clone();
        self.core.run(move |registry, core| -> Result<()> {
            let entry = registry.adapter(&key)?;
            if !entry.devices.all_disconnected() {
                debug!("{}: cannot close with active devices", key.id);
                return Err(ErrorKind::Busy.into());
            }
            drop(entry.stop_scan(core));
            release(registry, core, &key)
        })?
    }

    /// Starts scanning and returns immediately.
    ///
    /// `handler` is called for every device found, once per device unless the filter asks for
    /// changes. The scan stops by itself after `timeout`, or runs until
    /// [`scan_disable()`][Self::scan_disable] if `timeout` is zero.
    pub fn scan_enable_non_blocking(
        &self,
        handler: impl DiscoveredHandler,
        timeout: Duration,
        filter: DiscoveryFilter,
    ) -> Result<()> {
        self.start_scan(Arc::new(handler), timeout, filter)
            .map(|_| ())
    }

    /// Scans until `timeout` elapses or the scan is disabled from another thread.
    pub fn scan_enable(
        &self,
        handler: impl DiscoveredHandler,
        timeout: Duration,
        filter: DiscoveryFilter,
    ) -> Result<()> {
        let serial = self.start_scan(Arc::new(handler), timeout, filter)?;
        let adapter = self.clone();
        self.core.wait_for(None, move || !adapter.is_scan_running(serial))?;
        Ok(())
    }

    /// Stops a scan in progress. Does nothing if the adapter is not scanning.
    pub fn scan_disable(&self) -> Result<()> {
        let key = self.key.clone();
        self.core.run(move |registry, core| -> Result<()> {
            let entry = registry.adapter(&key)?;
            if entry.scan.is_none() {
                trace!("{}: not scanning", key.id);
            }
            drop(entry.stop_scan(core));
            Ok(())
        })?
    }

    /// Whether a scan started through this library is running on the adapter.
    pub fn is_scanning(&self) -> Result<bool> {
        let key = self.key.clone();
        self.core
            .run(move |registry, _| registry.adapter(&key).map(|entry| entry.scan.is_some()))?
    }

    /// The lifecycle state of the device with the given address.
    pub fn device_state(&self, address: &str) -> Result<DeviceState> {
        let key = self.key.clone();
        let address = address.to_owned();
        self.core.run(move |registry, _| -> Result<DeviceState> {
            let entry = registry.adapter(&key)?;
            Ok(entry
                .devices
                .find_by_address(&address)
                .map_or(DeviceState::NotFound, |device| device.state()))
        })?
    }

    /// The latest advertisement received from the device with the given address.
    pub fn advertisement_data(&self, address: &str) -> Result<AdvertisementData> {
        let key = self.key.clone();
        let address = address.to_owned();
        self.core.run(move |registry, core| -> Result<AdvertisementData> {
            let entry = registry.adapter(&key)?;
            let device = entry
                .devices
                .find_by_address(&address)
                .ok_or(ErrorKind::NotFound)?;

            match core.platform.advertisement_data(&key.id, device.id()) {
                Err(err) if err.kind() == ErrorKind::NotSupported => {
                    Ok(device.advertisement_data.clone())
                }
                res => res,
            }
        })?
    }

    fn start_scan(
        &self,
        handler: Arc<dyn DiscoveredHandler>,
        timeout: Duration,
        filter: DiscoveryFilter,
    ) -> Result<u64> {
        let key = self.key.clone();
        self.core.run(move |registry, core| -> Result<u64> {
            let serial = registry.next_serial();
            let entry = registry.adapter(&key)?;
            if entry.scan.is_some() {
                return Err(ErrorKind::Busy.into());
            }

            core.platform.start_discovery(&key.id, &filter)?;
            let timer = (!timeout.is_zero()).then(|| arm_scan_timeout(core, &key, serial, timeout));
            entry.scan = Some(Scan {
                serial,
                handler,
                filter,
                seen: HashSet::new(),
                timer,
            });
            debug!("{}: scan started, timeout {timeout:?}", key.id);
            Ok(serial)
        })?
    }

    fn is_scan_running(&self, serial: u64) -> bool {
        let key = self.key.clone();
        self.core
            .run(move |registry, _| {
                registry
                    .adapter(&key)
                    .ok()
                    .and_then(|entry| entry.scan.as_ref())
                    .is_some_and(|scan| scan.serial == serial)
            })
            .unwrap_or(false)
    }
}

fn arm_scan_timeout(core: &Arc<Core>, key: &AdapterKey, serial: u64, timeout: Duration) -> Task<()> {
    let core_ref = Arc::downgrade(core);
    let key = key.clone();
    core.event_loop().spawn(async move {
        Timer::after(timeout).await;
        let Some(core) = core_ref.upgrade() else {
            return;
        };

        let _ = core.run(move |registry, core| {
            let Ok(entry) = registry.adapter(&key) else {
                return;
            };
            if entry.scan.as_ref().is_some_and(|scan| scan.serial == serial) {
                debug!("{}: scan timed out", key.id);
                // This task is the timer being returned; it is already finishing.
                if let Some(timer) = entry.stop_scan(core) {
                    timer.detach();
                }
            }
        });
    })
}

pub(crate) fn on_discovered(registry: &mut Registry, adapter: &str, device: DiscoveredDevice) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: discovery on unknown adapter");
        return;
    };

    if entry.devices.get(&device.id).is_none() {
        if let Err(err) =
            entry.set_device_state(&device.id, &device.address, DeviceState::Disconnected)
        {
            warn!("{}: cannot track device: {err}", device.id);
            return;
        }
    }
    if let Some(known) = entry.devices.get_mut(&device.id) {
        known.name.clone_from(&device.name);
        known.rssi = device.rssi;
        known.advertisement_data.clone_from(&device.advertisement_data);
    }

    let Some(scan) = entry.scan.as_mut() else {
        trace!("{}: discovered outside of a scan", device.id);
        return;
    };
    if !scan.seen.insert(device.id.clone()) && !scan.filter.notify_change {
        return;
    }

    dispatch::spawn_oneshot(Event::Discovered(scan.handler.clone(), device));
}

pub(crate) fn on_removed(registry: &mut Registry, adapter: &str, device: &str) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: removal on unknown adapter");
        return;
    };

    if let Err(err) = entry.set_device_state(device, "", DeviceState::NotFound) {
        warn!("{device}: ignoring removal: {err}");
    }
}
