//! Library and per-operation configuration.

use std::time::Duration;

use btuuid::BluetoothUuid;
use tracing::warn;

/// Adapter opened when [`Gattlib::adapter_open`][crate::Gattlib::adapter_open] is given no name.
pub const DEFAULT_ADAPTER: &str = "hci0";

/// How long a connection attempt may stay pending before it fails with `Timeout`.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(4);

/// How long `disconnect(wait = true)` waits for the platform to confirm the disconnection.
pub const DISCONNECTION_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound applied to synchronous GATT requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Library-wide settings, fixed when a [`Gattlib`][crate::Gattlib] instance is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The adapter opened when no name is given.
    pub default_adapter: String,
    /// The connection-establishment timeout.
    pub connection_timeout: Duration,
    /// The bound on waiting for a disconnection to be confirmed.
    pub disconnection_wait_timeout: Duration,
    /// The bound on synchronous GATT requests. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// The name of the event loop thread.
    pub event_loop_label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_adapter: DEFAULT_ADAPTER.to_owned(),
            connection_timeout: CONNECTION_TIMEOUT,
            disconnection_wait_timeout: DISCONNECTION_WAIT_TIMEOUT,
            request_timeout: Some(REQUEST_TIMEOUT),
            event_loop_label: "gattlib-event-loop".to_owned(),
        }
    }
}

impl Config {
    /// The default configuration, overridden by any of the following environment variables:
    ///
    /// - `GATTLIB_ADAPTER`: the default adapter name
    /// - `GATTLIB_CONNECT_TIMEOUT_MS`: the connection timeout in milliseconds
    /// - `GATTLIB_DISCONNECT_TIMEOUT_MS`: the disconnection wait timeout in milliseconds
    /// - `GATTLIB_REQUEST_TIMEOUT_MS`: the request timeout in milliseconds, `0` for no bound
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(adapter) = var("GATTLIB_ADAPTER").filter(|name| !name.is_empty()) {
            config.default_adapter = adapter;
        }
        if let Some(timeout) = millis(&var, "GATTLIB_CONNECT_TIMEOUT_MS") {
            config.connection_timeout = timeout;
        }
        if let Some(timeout) = millis(&var, "GATTLIB_DISCONNECT_TIMEOUT_MS") {
            config.disconnection_wait_timeout = timeout;
        }
        if let Some(timeout) = millis(&var, "GATTLIB_REQUEST_TIMEOUT_MS") {
            config.request_timeout = (!timeout.is_zero()).then_some(timeout);
        }

        config
    }

    /// Sets the adapter opened when no name is given.
    pub fn with_default_adapter(mut self, name: impl Into<String>) -> Self {
        self.default_adapter = name.into();
        self
    }

    /// Sets how long a connection attempt may stay `Connecting` before it fails with
    /// [`ErrorKind::Timeout`][crate::ErrorKind::Timeout].
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets how long a waiting disconnect blocks for the platform to confirm the link is gone.
    pub fn with_disconnection_wait_timeout(mut self, timeout: Duration) -> Self {
        self.disconnection_wait_timeout = timeout;
        self
    }

    /// Sets the bound on blocking GATT requests. `None` waits indefinitely.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use gattlib::Config;
    /// let config = Config::default()
    ///     .with_connection_timeout(Duration::from_secs(10))
    ///     .with_request_timeout(None);
    /// assert_eq!(config.connection_timeout, Duration::from_secs(10));
    /// assert_eq!(config.request_timeout, None);
    /// ```
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the name of the event loop thread.
    pub fn with_event_loop_label(mut self, label: impl Into<String>) -> Self {
        self.event_loop_label = label.into();
        self
    }
}

fn millis(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let value = var(key)?;
    match value.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            warn!("ignoring {key}={value:?}: {err}");
            None
        }
    }
}

/// The kind of address a peripheral advertises with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// The link security requested when connecting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Options for connecting to a device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// The address type of the destination.
    pub address_type: AddressType,
    /// The security level to establish.
    pub security: SecurityLevel,
    /// The ATT MTU to negotiate, if any.
    pub mtu: Option<u16>,
}

/// Restricts which advertisements are reported while scanning.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Only report devices advertising at least one of these services. Empty means all.
    pub uuids: Vec<BluetoothUuid>,
    /// Only report devices received at or above this signal strength, in dBm.
    pub rssi_threshold: Option<i16>,
    /// Report a device again each time its advertisement changes, instead of once per scan.
    pub notify_change: bool,
}

impl DiscoveryFilter {
    /// Only reports devices advertising one of `uuids`.
    pub fn with_uuids(mut self, uuids: impl IntoIterator<Item = BluetoothUuid>) -> Self {
        self.uuids = uuids.into_iter().collect();
        self
    }

    /// Only reports devices heard at `rssi` dBm or stronger.
    pub fn with_rssi_threshold(mut self, rssi: i16) -> Self {
        self.rssi_threshold = Some(rssi);
        self
    }

    /// Reports a device again each time its advertisement changes.
    pub fn with_notify_change(mut self, notify_change: bool) -> Self {
        self.notify_change = notify_change;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.default_adapter, "hci0");
        assert_eq!(config.connection_timeout, Duration::from_secs(4));
        assert_eq!(config.disconnection_wait_timeout, Duration::from_secs(5));
        assert_eq!(Config::from_vars(vars(&[])), config);
    }

    #[test]
    fn overrides_from_environment() {
        let config = Config::from_vars(vars(&[
            ("GATTLIB_ADAPTER", "hci1"),
            ("GATTLIB_CONNECT_TIMEOUT_MS", "250"),
            ("GATTLIB_DISCONNECT_TIMEOUT_MS", "bogus"),
            ("GATTLIB_REQUEST_TIMEOUT_MS", "0"),
        ]));
        assert_eq!(config.default_adapter, "hci1");
        assert_eq!(config.connection_timeout, Duration::from_millis(250));
        assert_eq!(config.disconnection_wait_timeout, DISCONNECTION_WAIT_TIMEOUT);
        assert_eq!(config.request_timeout, None);
    }
}
