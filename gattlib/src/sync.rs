//! Primitives bridging the event loop and blocked caller threads.

use std::pin::Pin;
use std::sync::{Condvar, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_io::Timer;
use futures_channel::oneshot;
use futures_lite::future;

use crate::error::{Error, ErrorKind, Result};

/// A broadcast wake-up for threads waiting on registry state.
///
/// Waiters do not inspect the signal's own state. They re-evaluate a predicate after each wake,
/// so a notification only means "something changed, look again".
#[derive(Debug, Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Blocks until `predicate` returns `true` or `timeout` elapses.
    ///
    /// Returns the final value of the predicate. The predicate runs without the signal's lock held.
    pub(crate) fn wait_until(
        &self,
        timeout: Option<Duration>,
        mut predicate: impl FnMut() -> bool,
    ) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            // Sample the generation first so a notify racing with the predicate is not lost.
            let seen = *self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            if predicate() {
                return true;
            }

            let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            while *generation == seen {
                match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            drop(generation);
                            return predicate();
                        }
                        generation = self
                            .condvar
                            .wait_timeout(generation, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                    None => {
                        generation = self
                            .condvar
                            .wait(generation)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
        }
    }
}

/// Creates a linked [`Reply`] / [`Completion`] pair for one platform request.
pub fn completion<T>() -> (Reply<T>, Completion<T>) {
    let (sender, receiver) = oneshot::channel();
    (Reply { sender }, Completion { receiver })
}

/// The completing half of a platform request, handed to a [`GattSession`][crate::platform::GattSession].
#[derive(Debug)]
pub struct Reply<T> {
    sender: oneshot::Sender<Result<T>>,
}

impl<T> Reply<T> {
    /// Completes the request.
    pub fn send(self, result: Result<T>) {
        let _ = self.sender.send(result);
    }

    pub fn ok(self, value: T) {
        self.send(Ok(value))
    }

    pub fn err(self, error: impl Into<Error>) {
        self.send(Err(error.into()))
    }

    /// Returns `true` if nobody is waiting for the result any more.
    pub fn is_canceled(&self) -> bool {
        self.sender.is_canceled()
    }
}

/// The pending result of a platform request.
///
/// A `Completion` can be awaited, or waited on synchronously with [`wait()`][Self::wait]. If the
/// platform drops the matching [`Reply`] without sending, the request resolves with
/// [`ErrorKind::DeviceDisconnected`].
#[derive(Debug)]
#[must_use = "a completion does nothing unless waited on or awaited"]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// Blocks the calling thread until the request completes or `timeout` elapses.
    ///
    /// This must not be called on the event loop thread, which is the thread that completes it.
    pub fn wait(self, timeout: Option<Duration>) -> Result<T> {
        match timeout {
            None => future::block_on(self),
            Some(timeout) => future::block_on(future::or(self, async move {
                Timer::after(timeout).await;
                Err(ErrorKind::Timeout.into())
            })),
        }
    }

    /// Returns the result if the request has already completed.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(ErrorKind::DeviceDisconnected.into())),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(ErrorKind::DeviceDisconnected.into())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn wait_until_observes_notified_state() {
        let signal = Arc::new(Signal::default());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = signal.clone();
            let flag = flag.clone();
            thread::spawn(move || {
                signal.wait_until(Some(Duration::from_secs(5)), || flag.load(Ordering::SeqCst))
            })
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
        signal.notify();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_until_is_bounded() {
        let signal = Signal::default();
        let start = Instant::now();
        assert!(!signal.wait_until(Some(Duration::from_millis(50)), || false));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn completion_resolves_from_another_thread() {
        let (reply, completion) = completion();
        thread::spawn(move || reply.ok(17u8));
        assert_eq!(completion.wait(Some(Duration::from_secs(5))), Ok(17));
    }

    #[test]
    fn dropped_reply_means_disconnected() {
        let (reply, completion) = completion::<()>();
        drop(reply);
        assert_eq!(
            completion.wait(None).unwrap_err().kind(),
            ErrorKind::DeviceDisconnected
        );
    }

    #[test]
    fn completion_wait_times_out() {
        let (_reply, completion) = completion::<()>();
        assert_eq!(
            completion.wait(Some(Duration::from_millis(20))).unwrap_err().kind(),
            ErrorKind::Timeout
        );
    }
}
