//! Address spaces of user processes and the program loader.
//!
//! The kernel never walks page tables itself. A process's memory is reached
//! through its [`AddressSpace`], which translates a user [`Va`] into the
//! [`Kva`] the kernel may dereference, together with the [`Permission`] of the
//! page. A [`Loader`] turns an executable file into a fresh address space and
//! the entry point of the program.

use crate::{KernelError, addressing::{Kva, Va}, fs::RegularFile, task::Task};
use alloc::boxed::Box;
use core::ops::Range;

bitflags::bitflags! {
    /// Access permission of a mapped page.
    pub struct Permission: u32 {
        /// The page is readable.
        const READ = 1 << 0;
        /// The page is writable.
        const WRITE = 1 << 1;
        /// The page is accessible from the user mode.
        const USER = 1 << 2;
    }
}

/// The virtual memory of a single process.
pub trait AddressSpace
where
    Self: Send + Sync,
{
    /// Translates a user virtual address.
    ///
    /// # Returns
    /// - `Some((kva, permission))` if the page containing `va` is mapped.
    /// - `None` otherwise.
    fn translate(&self, va: Va) -> Option<(Kva, Permission)>;

    /// Validates a given **memory address range** before use.
    ///
    /// Every byte of `addr` must be a user address, mapped, accessible from
    /// the user mode, and writable if `is_write` is true. Each byte is checked
    /// on its own; a valid head of the range tells nothing about its tail.
    fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        let required = if is_write {
            Permission::USER | Permission::WRITE
        } else {
            Permission::USER | Permission::READ
        };
        (addr.start.into_usize()..addr.end.into_usize()).all(|a| {
            Va::new(a).is_some_and(|va| {
                va.is_user()
                    && self
                        .translate(va)
                        .is_some_and(|(_, perm)| perm.contains(required))
            })
        })
    }
}

/// The user-mode entry of a loaded program.
///
/// The entry runs on the main thread of the new process, and enters the kernel
/// through the given [`Task`] whenever it makes a system call.
pub type Entry = Box<dyn FnOnce(&mut dyn Task) + Send>;

/// A program image ready to run.
pub struct Image {
    /// The address space the program runs in.
    pub mm: Box<dyn AddressSpace>,
    /// The entry point of the program.
    pub entry: Entry,
}

/// Builds program images from executable files.
pub trait Loader
where
    Self: Send + Sync,
{
    /// Loads the executable `file` and prepares it to run with the arguments
    /// `argv`. `argv[0]` is the program name.
    ///
    /// # Errors
    /// - [`KernelError::NoExec`] if `file` is not a valid executable.
    /// - [`KernelError::NoMemory`] if the address space cannot be built.
    fn load(&self, file: &RegularFile, argv: &[&str]) -> Result<Image, KernelError>;
}
