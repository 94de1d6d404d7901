//! # KeOS: KAIST Educational Operating System
//!
//! This crate is the kernel service layer that user-program support is built
//! on. It does not drive hardware by itself. Instead, it defines the services a
//! process-management layer needs, and the interfaces through which the rest of
//! the machine (storage, console, scheduler, program loader) is plugged in:
//!
//! - [`KernelError`]: the error type carried by every fallible kernel
//!   operation.
//! - [`sync`]: a [`SpinLock`] with explicit unlocking and a counting
//!   [`Semaphore`] for cross-thread notification.
//! - [`addressing`]: user and kernel virtual addresses.
//! - [`mm`]: the per-process address space interface and the program loader.
//! - [`fs`]: the storage interface and path resolution.
//! - [`teletype`]: the console device.
//! - [`thread`]: the scheduler interface used to create kernel threads.
//! - [`syscall`]: the trapped register frame and user memory access
//!   ([`syscall::uaccess`]).
//! - [`task`]: the [`Task`] trait, the per-thread system call entry.
//!
//! All collaborators are collected into a [`System`] with the
//! [`SystemConfigurationBuilder`]:
//!
//! ```ignore
//! let system = SystemConfigurationBuilder::new()
//!     .set_filesystem(fs)
//!     .set_teletype(tty)
//!     .set_scheduler(scheduler)
//!     .set_loader(loader)
//!     .build()?;
//! ```
//!
//! ## Implementation Notes
//!
//! Locks in KeOS are **not** released when their guard goes out of scope. Every
//! critical section must end with an explicit [`SpinLockGuard::unlock`]; a
//! guard dropped without unlocking panics and reports where the lock was taken.
//! Take care to release the lock before propagating an error with `?`.
//!
//! [`SpinLock`]: sync::SpinLock
//! [`SpinLockGuard::unlock`]: sync::SpinLockGuard::unlock
//! [`Semaphore`]: sync::Semaphore
//! [`Task`]: task::Task

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[macro_use]
pub mod kprint;

pub mod addressing;
pub mod fs;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod teletype;
pub mod thread;

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::AtomicBool;
use mm::Loader;
use sync::SpinLock;
use teletype::Teletype;
use thread::Scheduler;

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel operation.
/// Each variant corresponds to a specific type of error that might
/// occur during the handling of a kernel operation.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// No such process. (ESRCH)
    NoSuchProcess,
    /// IO Error. (EIO)
    IOError,
    /// Exec format error. (ENOEXEC)
    NoExec,
    /// BAD file descriptor. (EBADF)
    BadFileDescriptor,
    /// No child processes. (ECHILD)
    NoSuchChild,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Bad address. (EFAULT)
    BadAddress,
    /// File exists. (EEXIST)
    FileExist,
    /// Not a directory. (ENOTDIR)
    NotDirectory,
    /// Is a directory. (EISDIR)
    IsDirectory,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// No space left on device. (ENOSPC)
    NoSpace,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
    /// Directory not empty (ENOTEMPTY)
    DirectoryNotEmpty,
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

/// Suppress the leveled messages ([`info!`], [`warning!`] and [`debug!`]).
pub static QUITE: AtomicBool = AtomicBool::new(false);

/// The services of a running machine.
///
/// A [`System`] is shared by every process through an [`Arc`] and is only
/// constructed through the [`SystemConfigurationBuilder`].
pub struct System {
    fs: fs::FileSystem,
    tty: SpinLock<Box<dyn Teletype>>,
    scheduler: Box<dyn Scheduler>,
    loader: Box<dyn Loader>,
}

impl System {
    /// The mounted file system.
    #[inline]
    pub fn file_system(&self) -> &fs::FileSystem {
        &self.fs
    }

    /// The console device.
    #[inline]
    pub fn teletype(&self) -> &SpinLock<Box<dyn Teletype>> {
        &self.tty
    }

    /// The thread scheduler.
    #[inline]
    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    /// The executable loader.
    #[inline]
    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring the system-wide services before initialization. Every service
/// must be provided before [`SystemConfigurationBuilder::build`] is called.
#[derive(Default)]
pub struct SystemConfigurationBuilder {
    fs: Option<fs::FileSystem>,
    tty: Option<Box<dyn Teletype>>,
    scheduler: Option<Box<dyn Scheduler>>,
    loader: Option<Box<dyn Loader>>,
}

impl SystemConfigurationBuilder {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the file system mounted as the root.
    pub fn set_filesystem(mut self, fs: impl fs::traits::FileSystem + 'static) -> Self {
        self.fs = Some(fs::FileSystem::new(fs));
        self
    }

    /// Sets the console device.
    pub fn set_teletype(mut self, tty: impl Teletype + 'static) -> Self {
        self.tty = Some(Box::new(tty));
        self
    }

    /// Sets the system-wide scheduler.
    ///
    /// The provided scheduler must implement the [`Scheduler`] trait and have
    /// a `'static` lifetime, meaning it must outlive all references.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Sets the executable loader.
    pub fn set_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Finishes the configuration.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if any service is missing.
    pub fn build(self) -> Result<Arc<System>, KernelError> {
        match (self.fs, self.tty, self.scheduler, self.loader) {
            (Some(fs), Some(tty), Some(scheduler), Some(loader)) => {
                info!("System: file system, console, scheduler and loader are ready.");
                Ok(Arc::new(System {
                    fs,
                    tty: SpinLock::new(tty),
                    scheduler,
                    loader,
                }))
            }
            (fs, tty, scheduler, loader) => {
                warning!(
                    "System: incomplete configuration (fs: {}, tty: {}, scheduler: {}, loader: {}).",
                    fs.is_some(),
                    tty.is_some(),
                    scheduler.is_some(),
                    loader.is_some()
                );
                Err(KernelError::InvalidArgument)
            }
        }
    }
}
