use std::ops::Deref;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_channel::{mpsc, oneshot};
use futures_lite::Stream;
use gattlib::platform::DiscoveredDevice;
use gattlib::{Adapter, ConnectOptions, Connection, DiscoveryFilter, Gattlib};
use tracing::debug;

use crate::connection::ConnectionAsync;
use crate::error::Result;

/// An [`Adapter`] with `async` scanning and connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterAsync {
    inner: Adapter,
}

impl Deref for AdapterAsync {
    type Target = Adapter;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<Adapter> for AdapterAsync {
    fn from(inner: Adapter) -> Self {
        Self { inner }
    }
}

impl AdapterAsync {
    /// Opens an adapter, or the configured default adapter if `name` is `None`.
    pub fn open(gattlib: &Gattlib, name: Option<&str>) -> Result<Self> {
        Ok(gattlib.adapter_open(name)?.into())
    }

    pub fn into_inner(self) -> Adapter {
        self.inner
    }

    /// Starts scanning and returns the discovered devices as a stream.
    ///
    /// The stream ends once the scan stops, either after `timeout` or when the scan is disabled.
    /// A zero `timeout` scans until the stream is dropped. Dropping the stream stops the scan.
    pub fn scan(&self, filter: DiscoveryFilter, timeout: Duration) -> Result<ScanStream> {
        let (sender, receiver) = mpsc::unbounded();
        self.inner.scan_enable_non_blocking(
            move |device: &DiscoveredDevice| {
                let _ = sender.unbounded_send(device.clone());
            },
            timeout,
            filter,
        )?;

        Ok(ScanStream {
            adapter: self.inner.clone(),
            receiver,
            finished: false,
        })
    }

    /// Connects to the device with the given address.
    ///
    /// If the returned future is dropped before it completes, a connection that is established
    /// anyway is disconnected again.
    pub async fn connect(&self, address: &str, options: ConnectOptions) -> Result<ConnectionAsync> {
        let (sender, receiver) = oneshot::channel();
        self.inner
            .connect(address, options, move |result: gattlib::Result<Connection>| {
                if let Err(Ok(connection)) = sender.send(result) {
                    abandon(connection);
                }
            })?;

        let mut pending = PendingConnect(receiver);
        let connection = (&mut pending.0).await??;
        ConnectionAsync::new(connection)
    }
}

fn abandon(connection: Connection) {
    debug!("{}: connect canceled, disconnecting", connection.address());
    if let Err(err) = connection.disconnect(false) {
        debug!("{}: {err}", connection.address());
    }
}

struct PendingConnect(oneshot::Receiver<gattlib::Result<Connection>>);

impl Drop for PendingConnect {
    fn drop(&mut self) {
        self.0.close();
        if let Ok(Some(Ok(connection))) = self.0.try_recv() {
            abandon(connection);
        }
    }
}

/// Devices found by [`AdapterAsync::scan()`].
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct ScanStream {
    adapter: Adapter,
    receiver: mpsc::UnboundedReceiver<DiscoveredDevice>,
    finished: bool,
}

impl Stream for ScanStream {
    type Item = DiscoveredDevice;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.receiver).poll_next(cx);
        if let Poll::Ready(None) = res {
            this.finished = true;
        }
        res
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        // A finished stream belongs to a scan that already stopped.
        if !self.finished {
            if let Err(err) = self.adapter.scan_disable() {
                debug!("{}: {err}", self.adapter.name());
            }
        }
    }
}
