pub type BroadcastReceiver<T> = async_broadcast::Receiver<T>;

/// A lossy fan-out channel that stays open while nobody listens.
///
/// Once `capacity` values are buffered for a slow receiver, the oldest one is dropped.
pub struct Broadcast<T> {
    sender: async_broadcast::Sender<T>,
    idle: async_broadcast::InactiveReceiver<T>,
}

impl<T: Clone> Broadcast<T> {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity);
        sender.set_overflow(true);
        Self {
            sender,
            idle: receiver.deactivate(),
        }
    }

    /// Sends `value` to every current receiver without waiting.
    ///
    /// Returns `false` if there was nobody to send it to.
    pub fn publish(&self, value: T) -> bool {
        self.sender.try_broadcast(value).is_ok()
    }

    pub fn subscribe(&self) -> BroadcastReceiver<T> {
        self.idle.activate_cloned()
    }
}
