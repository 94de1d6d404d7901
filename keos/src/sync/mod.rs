//! Synchronization primitives.
//!
//! - [`SpinLock`]: mutual exclusion for short critical sections. The lock must
//!   be released with [`SpinLockGuard::unlock`].
//! - [`Semaphore`]: a counting semaphore, used to notify another thread that an
//!   event happened.

pub mod semaphore;
pub mod spinlock;

pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
