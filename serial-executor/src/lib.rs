//! An asynchronous executor bound to a dedicated serial worker thread.
//!
//! This crate provides an [`Executor`] that owns exactly one background thread and runs every
//! closure and task submitted to it on that thread, one at a time, in submission order.
//!
//! It also provides a [`Handle`] type that confines a value to an executor: the value can only be
//! reached by running a closure on the executor's thread, which turns the executor into the sole
//! owner (an actor) of that value.
//!
//! # Example
//!
//! ```
//! # use serial_executor::Executor;
//! let executor = Executor::new("worker").unwrap();
//! let counter = executor.handle(0u32);
//!
//! counter.lock(|value, _| *value += 1).unwrap();
//! assert_eq!(counter.lock(|value, _| *value).unwrap(), 1);
//!
//! let task = executor.spawn(async { 42 });
//! assert_eq!(futures_lite::future::block_on(task), 42);
//! executor.shutdown();
//! ```

use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use async_task::{Runnable, spawn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Work was submitted to an executor that has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Closed;

impl Display for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("executor closed")
    }
}

impl std::error::Error for Closed {}

/// The reason a [`Handle::lock`] call could not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockError {
    /// The owning executor has been closed.
    Closed,
    /// The handle is already locked further up the stack of the executor thread.
    Reentrant,
}

impl Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Closed => f.write_str("executor closed"),
            LockError::Reentrant => f.write_str("handle locked re-entrantly"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<Closed> for LockError {
    fn from(_: Closed) -> Self {
        LockError::Closed
    }
}

struct Queue {
    label: String,
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// An executor that runs closures and async tasks on a single dedicated thread.
///
/// Cloning an `Executor` yields another reference to the same thread and queue.
#[derive(Clone)]
pub struct Executor {
    queue: Arc<Queue>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("label", &self.queue.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Executor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.queue, &other.queue)
    }
}

impl Eq for Executor {}

impl Executor {
    /// Starts a new worker thread named `label` and returns an executor for it.
    pub fn new(label: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(label.to_owned())
            .spawn(move || run(receiver))?;

        Ok(Self {
            queue: Arc::new(Queue {
                label: label.to_owned(),
                thread_id: worker.thread().id(),
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Creates a new executor on a background thread and runs `entry` on that thread.
    ///
    /// This blocks the calling thread until `entry` returns, then hands its result back.
    pub fn background<F, R>(label: &str, entry: F) -> std::io::Result<R>
    where
        F: FnOnce(Self) -> R + Send + 'static,
        R: Send + 'static,
    {
        let executor = Self::new(label)?;
        let inner = executor.clone();
        executor
            .exec_sync(move || entry(inner))
            .map_err(std::io::Error::other)
    }

    /// The label the worker thread was created with.
    pub fn label(&self) -> &str {
        &self.queue.label
    }

    /// Returns `true` when called from this executor's worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.queue.thread_id
    }

    /// Returns `true` once [`close()`][Self::close] or [`shutdown()`][Self::shutdown] has been called.
    pub fn is_closed(&self) -> bool {
        self.queue
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Queues `job` to run on the worker thread and returns immediately.
    pub fn exec_async(&self, job: impl FnOnce() + Send + 'static) -> Result<(), Closed> {
        let sender = self
            .queue
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(Box::new(job)).map_err(|_| Closed),
            None => Err(Closed),
        }
    }

    /// Runs `func` on the worker thread and blocks until it returns.
    ///
    /// When called from the worker thread itself `func` runs inline, so a job may call back into
    /// its own executor without deadlocking.
    pub fn exec_sync<R>(&self, func: impl FnOnce() -> R + Send + 'static) -> Result<R, Closed>
    where
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(func());
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.exec_async(move || {
            let _ = sender.send(func());
        })?;
        // The sender is dropped without a value if `func` panicked or the queue shut down first.
        receiver.recv().map_err(|_| Closed)
    }

    /// Confines `value` to this executor. See [`Handle`].
    pub fn handle<T>(&self, value: T) -> Handle<T> {
        Handle {
            executor: self.clone(),
            value: Arc::new(Mutex::new(value)),
        }
    }

    /// Spawns a new asynchronous task, returning a [`Task`] that can be used to await its result.
    ///
    /// Dropping the `Task` will cancel it. If you want the task to run independently, you must call [`detach()`][Task::detach]
    pub fn spawn<R>(&self, future: impl Future<Output = R> + Send + 'static) -> Task<R>
    where
        R: Send + 'static,
    {
        let executor = self.clone();
        let (runnable, task) = spawn(future, move |runnable: Runnable| {
            // A runnable dropped here cancels its task.
            let _ = executor.exec_async(move || {
                runnable.run();
            });
        });
        runnable.schedule();
        Task(TaskState::Spawned(task))
    }

    /// Stops accepting new work. Work already queued still runs, after which the thread exits.
    pub fn close(&self) {
        let sender = self
            .queue
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
    }

    /// Closes the executor and waits for the worker thread to drain its queue and exit.
    ///
    /// Called from the worker thread itself this only closes the queue, since the thread cannot
    /// join itself.
    pub fn shutdown(&self) {
        self.close();
        if self.is_current() {
            return;
        }

        let worker = self
            .queue
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

fn run(receiver: Receiver<Job>) {
    // `recv` keeps yielding queued jobs after the sender is gone and only fails once the queue is empty.
    while let Ok(job) = receiver.recv() {
        let _ = catch_unwind(AssertUnwindSafe(job));
    }
}

/// A value owned by a specific [`Executor`].
///
/// All access goes through [`lock()`][Handle::lock], which runs on the owning executor's thread,
/// so the value is never touched concurrently and never needs to be shared across threads by
/// the caller.
pub struct Handle<T> {
    executor: Executor,
    value: Arc<Mutex<T>>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("serial_executor::Handle { .. }")
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Eq for Handle<T> {}

impl<T: Send + 'static> Handle<T> {
    /// Acquires the value, running the provided function on the owning executor's thread.
    ///
    /// This method will block the current thread until the function returns. Calling it from
    /// inside another `lock` of the same handle fails with [`LockError::Reentrant`].
    pub fn lock<R>(
        &self,
        func: impl FnOnce(&mut T, &Executor) -> R + Send + 'static,
    ) -> Result<R, LockError>
    where
        R: Send + 'static,
    {
        let value = self.value.clone();
        let executor = self.executor.clone();
        self.executor.exec_sync(move || {
            let mut guard = match value.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(LockError::Reentrant),
            };
            Ok(func(&mut *guard, &executor))
        })?
    }

    /// Queues `func` to run against the value and returns without waiting for it.
    pub fn lock_async(
        &self,
        func: impl FnOnce(&mut T, &Executor) + Send + 'static,
    ) -> Result<(), Closed> {
        let value = self.value.clone();
        let executor = self.executor.clone();
        self.executor.exec_async(move || {
            let mut guard = value.lock().unwrap_or_else(PoisonError::into_inner);
            func(&mut *guard, &executor);
        })
    }

    /// The executor that owns the value.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

#[derive(Debug)]
enum TaskState<T> {
    Ready(Option<T>),
    Spawned(async_task::Task<T>),
}

/// A future that resolves to the result of an asynchronous task.
///
/// Dropping a [`Task`] cancels it, which means its future won't be polled again. To drop the
/// [`Task`] handle without canceling it, use [`detach()`][`Task::detach()`] instead.
pub struct Task<T>(TaskState<T>);

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            TaskState::Ready(_) => f.write_str("Task::Ready"),
            TaskState::Spawned(_) => f.write_str("Task::Spawned"),
        }
    }
}

impl<T> Task<T> {
    /// Creates a new task that is already completed with the given value.
    pub fn ready(val: T) -> Self {
        Task(TaskState::Ready(Some(val)))
    }

    /// Detaches the task, allowing it to run in the background.
    pub fn detach(self) {
        match self {
            Task(TaskState::Ready(_)) => (),
            Task(TaskState::Spawned(task)) => task.detach(),
        }
    }

    /// Returns `true` if the task has run to completion.
    pub fn is_finished(&self) -> bool {
        match &self.0 {
            TaskState::Ready(_) => true,
            TaskState::Spawned(task) => task.is_finished(),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        match unsafe { self.get_unchecked_mut() } {
            Task(TaskState::Ready(val)) => match val.take() {
                Some(val) => Poll::Ready(val),
                None => panic!("`Task` polled after completion"),
            },
            Task(TaskState::Spawned(task)) => Pin::new(task).poll(cx),
        }
    }
}
