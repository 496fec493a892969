//! Notification and indication handler slots.
//!
//! Each connection has one slot per subscription kind. A slot owns a single-worker queue, so
//! values for one connection and kind reach the handler in the order the platform delivered
//! them, without the event loop ever waiting on a handler.

use std::sync::{Arc, Mutex, PoisonError};

use btuuid::BluetoothUuid;
use serial_executor::Executor;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::dispatch::{Event, NotificationHandler};
use crate::error::{ErrorKind, Result};
use crate::gatt::SubscriptionKind;
use crate::registry::Registry;
use crate::sync::{self, Completion};
use crate::uuid::to_uuid128;

type SharedHandler = Arc<Mutex<Option<Arc<dyn NotificationHandler>>>>;

/// The registration of a notification or indication handler on one connection.
pub(crate) struct HandlerSlot {
    handler: SharedHandler,
    queue: Executor,
}

impl HandlerSlot {
    fn new(kind: SubscriptionKind, handler: Arc<dyn NotificationHandler>) -> Result<Self> {
        Ok(Self {
            handler: Arc::new(Mutex::new(Some(handler))),
            queue: Executor::new(&format!("gattlib-{kind}"))?,
        })
    }

    fn replace(&self, handler: Arc<dyn NotificationHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Queues `value` for the handler. The handler is looked up again when the job runs, so a
    /// slot invalidated in the meantime delivers nothing.
    fn dispatch(&self, kind: SubscriptionKind, uuid: BluetoothUuid, value: Vec<u8>) {
        let handler = self.handler.clone();
        let res = self.queue.exec_async(move || {
            let current = handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let Some(handler) = current else {
                return;
            };
            match kind {
                SubscriptionKind::Notification => Event::Notification(handler, uuid, value),
                SubscriptionKind::Indication => Event::Indication(handler, uuid, value),
            }
            .deliver()
        });
        if res.is_err() {
            trace!("{kind} queue closed, dropping value");
        }
    }

    /// Clears the handler and hands back the queue, which may still hold jobs.
    pub(crate) fn invalidate(self) -> Executor {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.queue
    }
}

impl Connection {
    /// Registers the handler for notifications on this connection, replacing any previous one.
    pub fn register_notification_handler(&self, handler: impl NotificationHandler) -> Result<()> {
        self.register_handler(SubscriptionKind::Notification, Arc::new(handler))
    }

    /// Registers the handler for indications on this connection, replacing any previous one.
    pub fn register_indication_handler(&self, handler: impl NotificationHandler) -> Result<()> {
        self.register_handler(SubscriptionKind::Indication, Arc::new(handler))
    }

    /// Removes the notification handler.
    ///
    /// Values still queued for the handler are discarded. When this returns the handler is no
    /// longer running and will not be called again, unless this is called from the handler
    /// itself.
    pub fn unregister_notification_handler(&self) -> Result<()> {
        self.unregister_handler(SubscriptionKind::Notification)
    }

    /// Removes the indication handler. See [`unregister_notification_handler()`][Self::unregister_notification_handler].
    pub fn unregister_indication_handler(&self) -> Result<()> {
        self.unregister_handler(SubscriptionKind::Indication)
    }

    /// Subscribes to notifications from the characteristic identified by `uuid`.
    pub fn notification_start(&self, uuid: &BluetoothUuid) -> Result<()> {
        self.wait(self.request_subscribe(uuid, SubscriptionKind::Notification)?)
    }

    /// Ends the notification subscription to `uuid`. Fails with [`ErrorKind::NotFound`] if
    /// there is none.
    pub fn notification_stop(&self, uuid: &BluetoothUuid) -> Result<()> {
        self.wait(self.request_unsubscribe(uuid, SubscriptionKind::Notification)?)
    }

    /// Subscribes to indications from the characteristic identified by `uuid`.
    pub fn indication_start(&self, uuid: &BluetoothUuid) -> Result<()> {
        self.wait(self.request_subscribe(uuid, SubscriptionKind::Indication)?)
    }

    /// Ends the indication subscription to `uuid`. See
    /// [`notification_stop()`][Self::notification_stop].
    pub fn indication_stop(&self, uuid: &BluetoothUuid) -> Result<()> {
        self.wait(self.request_unsubscribe(uuid, SubscriptionKind::Indication)?)
    }

    /// Subscribes to `kind` updates of a characteristic. Subscribing twice is a no-op.
    pub fn request_subscribe(
        &self,
        uuid: &BluetoothUuid,
        kind: SubscriptionKind,
    ) -> Result<Completion<()>> {
        self.request_subscription(uuid, kind, true)
    }

    /// Ends a subscription. Fails with [`ErrorKind::NotFound`] if there is none.
    pub fn request_unsubscribe(
        &self,
        uuid: &BluetoothUuid,
        kind: SubscriptionKind,
    ) -> Result<Completion<()>> {
        self.request_subscription(uuid, kind, false)
    }

    fn request_subscription(
        &self,
        uuid: &BluetoothUuid,
        kind: SubscriptionKind,
        subscribe: bool,
    ) -> Result<Completion<()>> {
        let (reply, completion) = sync::completion();
        let (platform_reply, platform) = sync::completion();
        let key = to_uuid128(uuid);
        let target = *uuid;

        let issued = self.with_connection(move |connection| {
            if connection.is_subscribed(key, kind) == subscribe {
                if subscribe {
                    return Ok(false);
                }
                return Err(ErrorKind::NotFound.into());
            }

            // Recorded before the platform answers, since values can follow the confirmation
            // on the event loop ahead of any later job.
            connection.set_subscribed(key, kind, subscribe);
            if subscribe {
                connection.session().subscribe(&target, kind, platform_reply);
            } else {
                connection.session().unsubscribe(&target, kind, platform_reply);
            }
            Ok(true)
        })?;
        if !issued {
            reply.ok(());
            return Ok(completion);
        }

        let connection = self.clone();
        self.core()
            .event_loop()
            .spawn(async move {
                let res = platform.await;
                if res.is_err() {
                    let restored = connection.with_connection(move |entry| {
                        entry.set_subscribed(key, kind, !subscribe);
                        Ok(())
                    });
                    if let Err(err) = restored {
                        debug!("{kind} subscription outlived its connection: {err}");
                    }
                }
                reply.send(res);
            })
            .detach();

        Ok(completion)
    }

    fn register_handler(
        &self,
        kind: SubscriptionKind,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<()> {
        self.with_connection(move |connection| {
            let slot = connection.slot_mut(kind);
            match slot {
                Some(slot) => slot.replace(handler),
                None => *slot = Some(HandlerSlot::new(kind, handler)?),
            }
            Ok(())
        })
    }

    fn unregister_handler(&self, kind: SubscriptionKind) -> Result<()> {
        let queue = self.with_connection(move |connection| {
            Ok(connection.slot_mut(kind).take().map(HandlerSlot::invalidate))
        })?;

        if let Some(queue) = queue {
            // Joins the worker. From the handler's own thread this only closes it.
            queue.shutdown();
            debug!("{}: {kind} handler unregistered", self.address());
        }
        Ok(())
    }
}

pub(crate) fn on_value_changed(
    registry: &mut Registry,
    adapter: &str,
    device: &str,
    uuid: BluetoothUuid,
    kind: SubscriptionKind,
    value: Vec<u8>,
) {
    let Some(entry) = registry.adapter_by_id(adapter) else {
        warn!("{adapter}: value on unknown adapter");
        return;
    };
    let Some(connection) = entry.connection_mut(device) else {
        debug!("{device}: {kind} without a connection");
        return;
    };
    if !connection.is_subscribed(to_uuid128(&uuid), kind) {
        debug!("{device}: unsolicited {kind}");
        return;
    }

    match connection.slot(kind) {
        Some(slot) => slot.dispatch(kind, uuid, value),
        None => trace!("{device}: no {kind} handler"),
    }
}
