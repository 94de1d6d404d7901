//! Counting semaphore.
//!
//! A semaphore created with zero permits works as a one-shot notification: the
//! thread that waits for an event calls [`Semaphore::wait`], and the thread that
//! makes the event happen calls [`Semaphore::signal`]. The order of the two
//! calls does not matter; a signal that arrives first is kept until it is
//! consumed.
//!
//! A waiter without a permit does not spin. It queues its [`ParkHandle`] on
//! the semaphore and parks through the [`Scheduler`]; `signal` unparks the
//! oldest waiter.
//!
//! ```ignore
//! use keos::sync::Semaphore;
//!
//! let sema = Semaphore::new(0);
//! sema.signal();
//! sema.wait(system.scheduler()); // Returns immediately.
//! assert_eq!(sema.permits(), 0);
//! ```

use super::SpinLock;
use crate::thread::{ParkHandle, Scheduler};
use alloc::{boxed::Box, collections::VecDeque};

struct Inner {
    permits: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore.
///
/// A semaphore maintains a set of permits. [`wait`] blocks until a permit is
/// available and takes it, and [`signal`] releases one.
///
/// Releasing a permit happens-before the [`wait`] that takes it returns, so
/// every write made before [`signal`] is visible after [`wait`].
///
/// [`wait`]: Semaphore::wait
/// [`signal`]: Semaphore::signal
pub struct Semaphore {
    inner: SpinLock<Inner>,
}

impl Semaphore {
    /// Creates a new semaphore initialized with a specified number of permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            inner: SpinLock::new(Inner {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    ///
    /// If no permits are available, the current thread is parked on
    /// `scheduler` until another thread calls `signal()` to release a permit.
    pub fn wait(&self, scheduler: &dyn Scheduler) {
        while !self.try_wait() {
            scheduler.park_with(Box::new(|handle| {
                let mut inner = self.inner.lock();
                if inner.permits > 0 {
                    // Signaled in the meantime.
                    inner.unlock();
                    handle.unpark();
                } else {
                    inner.waiters.push_back(handle);
                    inner.unlock();
                }
            }));
        }
    }

    /// Acquires a permit if one is available, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut inner = self.inner.lock();
        let acquired = inner.permits > 0;
        if acquired {
            inner.permits -= 1;
        }
        inner.unlock();
        acquired
    }

    /// Releases a permit back to the semaphore, and wakes up one waiter.
    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        inner.permits += 1;
        let waiter = inner.waiters.pop_front();
        inner.unlock();
        if let Some(waiter) = waiter {
            waiter.unpark();
        }
    }

    /// The number of available permits.
    pub fn permits(&self) -> usize {
        let inner = self.inner.lock();
        let permits = inner.permits;
        inner.unlock();
        permits
    }
}
