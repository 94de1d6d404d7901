//! The per-thread entry into the kernel.

use crate::syscall::Registers;
use core::ops::ControlFlow;

/// The trait that every thread running a user program implements.
pub trait Task {
    /// Handles a **system call** triggered by the user program.
    ///
    /// - The `registers` parameter contains the state of the CPU registers at
    ///   the time of the system call.
    /// - Implementations of this function should parse the system call
    ///   arguments, execute the corresponding operation, and store the result
    ///   back in `registers`.
    ///
    /// # Returns
    /// - [`ControlFlow::Continue`] to resume the user program.
    /// - [`ControlFlow::Break`] if the thread must not return to the user
    ///   mode, because its process has exited.
    fn syscall(&mut self, registers: &mut Registers) -> ControlFlow<()>;
}
