//! Kernel threads.
//!
//! The scheduler itself is provided by the machine through the [`Scheduler`]
//! trait. The kernel creates threads with a [`ThreadBuilder`]. A thread's id
//! is allocated before the thread exists, so that the creator can publish it
//! before the new thread gets a chance to run.
//!
//! A thread that has to wait for an event does not spin: it hands a
//! [`ParkHandle`] to whoever will make the event happen, and parks with
//! [`Scheduler::park_with`]. The scheduler does not run the thread again until
//! the handle is consumed with [`ParkHandle::unpark`].

use crate::KernelError;
use alloc::{boxed::Box, string::String};

/// A thread identifier. Never reused while the machine is running.
pub type Tid = u64;

/// The body of a thread.
pub type ThreadFn = Box<dyn FnOnce() + Send>;

/// A handle that represent the parked thread.
pub struct ParkHandle {
    wake: Box<dyn FnOnce() + Send>,
}

impl ParkHandle {
    /// Creates a handle that runs `wake` when the thread is unparked.
    ///
    /// `wake` must make the parked thread runnable again.
    pub fn new<F: FnOnce() + Send + 'static>(wake: F) -> Self {
        Self {
            wake: Box::new(wake),
        }
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        (self.wake)()
    }
}

/// The system-wide thread scheduler.
pub trait Scheduler
where
    Self: Send + Sync,
{
    /// Allocates a fresh thread id.
    fn allocate_tid(&self) -> Tid;

    /// Starts a thread named `name` with id `tid`, running `thread_fn`.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if the thread cannot be created.
    fn spawn(&self, tid: Tid, name: &str, thread_fn: ThreadFn) -> Result<(), KernelError>;

    /// Runs `f` with the [`ParkHandle`] of the current thread, and then parks
    /// the current thread until the handle is unparked.
    ///
    /// The handle may be unparked before the thread is parked, even by `f`
    /// itself. The thread then returns without sleeping. A wakeup is never
    /// lost.
    ///
    /// The caller must not hold a lock.
    fn park_with(&self, f: Box<dyn FnOnce(ParkHandle) + '_>);

    /// Stops every thread and powers off the machine.
    fn power_off(&self);
}

/// A builder for a new thread.
pub struct ThreadBuilder<'a> {
    scheduler: &'a dyn Scheduler,
    name: String,
    tid: Tid,
}

impl<'a> ThreadBuilder<'a> {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(scheduler: &'a dyn Scheduler, name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            tid: scheduler.allocate_tid(),
            scheduler,
            name: String::from(name),
        }
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> Tid {
        self.tid
    }

    /// Spawn the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> Result<Tid, KernelError> {
        self.scheduler
            .spawn(self.tid, &self.name, Box::new(thread_fn))
            .map(|_| self.tid)
    }
}
