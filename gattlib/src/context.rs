//! The library instance and the event loop it owns.
//!
//! All registry state lives on one event loop thread. Public calls hop onto it and block
//! callers only where the operation is synchronous.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serial_executor::{Executor, Handle};
use tracing::debug;

use crate::adapter::{self, Adapter};
use crate::config::Config;
use crate::connection;
use crate::error::{ErrorKind, Result};
use crate::platform::{EventSink, Platform};
use crate::registry::Registry;
use crate::simulated::SimulatedPlatform;
use crate::sync::{Completion, Signal};

/// State shared by every handle of one library instance.
pub(crate) struct Core {
    pub(crate) config: Config,
    pub(crate) registry: Handle<Registry>,
    pub(crate) platform: Box<dyn Platform>,
    /// Woken whenever a device disconnects or a scan stops.
    pub(crate) signal: Signal,
}

impl Core {
    /// Runs `func` against the registry on the event loop, blocking until it returns.
    pub(crate) fn run<R>(
        self: &Arc<Self>,
        func: impl FnOnce(&mut Registry, &Arc<Core>) -> R + Send + 'static,
    ) -> Result<R>
    where
        R: Send + 'static,
    {
        let core = self.clone();
        Ok(self.registry.lock(move |registry, _| func(registry, &core))?)
    }

    pub(crate) fn event_loop(&self) -> &Executor {
        self.registry.executor()
    }

    /// Blocks the calling thread on `completion`.
    pub(crate) fn wait<T>(&self, completion: Completion<T>, timeout: Option<Duration>) -> Result<T> {
        if self.event_loop().is_current() {
            // The event loop completes requests, so it can never wait on one.
            return Err(ErrorKind::Unexpected.into());
        }
        completion.wait(timeout)
    }

    /// Blocks until `predicate` holds, re-checking it each time the signal fires.
    pub(crate) fn wait_for(
        &self,
        timeout: Option<Duration>,
        predicate: impl FnMut() -> bool,
    ) -> Result<bool> {
        if self.event_loop().is_current() {
            return Err(ErrorKind::Unexpected.into());
        }
        Ok(self.signal.wait_until(timeout, predicate))
    }
}

/// An instance of the library, bound to one platform.
///
/// Creating a `Gattlib` starts its event loop thread. Every [`Adapter`] and
/// [`Connection`][crate::Connection] obtained through it keeps the instance alive.
#[derive(Clone)]
pub struct Gattlib {
    core: Arc<Core>,
}

impl std::fmt::Debug for Gattlib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gattlib")
            .field("config", &self.core.config)
            .finish_non_exhaustive()
    }
}

impl Gattlib {
    /// Starts a library instance driving `platform`.
    pub fn new(config: Config, platform: impl Platform + 'static) -> Result<Self> {
        let registry = Executor::background(&config.event_loop_label, |executor| {
            debug!("event loop started on {}", executor.label());
            executor.handle(Registry::default())
        })?;

        let core = Arc::new(Core {
            config,
            registry,
            platform: Box::new(platform),
            signal: Signal::default(),
        });
        core.platform.attach(EventSink::new(Arc::downgrade(&core)));

        Ok(Self { core })
    }

    /// Starts a library instance on an in-process [`SimulatedPlatform`] that already has the
    /// configured default adapter. The platform is returned alongside so it can be scripted.
    pub fn simulated(config: Config) -> Result<(Self, SimulatedPlatform)> {
        let platform = SimulatedPlatform::new();
        platform.add_adapter(&config.default_adapter);
        let gattlib = Self::new(config, platform.clone())?;
        Ok((gattlib, platform))
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Opens the adapter called `name`, or the configured default adapter.
    ///
    /// Opening an adapter that is already open returns the same adapter with its reference
    /// count incremented.
    pub fn adapter_open(&self, name: Option<&str>) -> Result<Adapter> {
        adapter::open(&self.core, name)
    }

    /// Runs `task` on a dedicated thread while the event loop keeps serving it, and returns the
    /// task's result.
    pub fn mainloop<F, R>(&self, task: F) -> Result<R>
    where
        F: FnOnce(Gattlib) -> R + Send + 'static,
        R: Send + 'static,
    {
        let gattlib = self.clone();
        let task = thread::Builder::new()
            .name("gattlib-task".to_owned())
            .spawn(move || task(gattlib))?;
        task.join().map_err(|_| ErrorKind::Unexpected.into())
    }

    /// Stops the event loop. Every later operation on this instance fails with
    /// [`ErrorKind::AdapterClosed`], and so does every connection attempt still in progress.
    pub fn shutdown(&self) {
        debug!("shutting down event loop");
        if let Err(err) = self.core.run(connection::abort_pending) {
            debug!("event loop already stopped: {err}");
        }
        self.core.event_loop().shutdown();
    }
}
