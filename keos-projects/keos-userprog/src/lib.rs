//! # User Programs
//!
//! This crate lets KeOS run user programs. A user program lives in its own
//! address space below [`PHYS_BASE`], and may only ask the kernel for services
//! through **system calls**. It is the kernel's job to make sure that nothing a
//! program does, however buggy or malicious, can crash the kernel or corrupt
//! another process.
//!
//! The crate is built from four pieces:
//!
//! - [`System Call Infrastructure`]: decode the system call number and the
//!   arguments from the user stack, validating every byte before reading it.
//! - [`File Descriptor Table`]: give each process private handles to the files
//!   it opens.
//! - [`Processes`]: start a program as a child process, wait for it, and tear
//!   it down when it exits.
//! - [`Parent-Child Handoff`]: the record through which a parent and a child
//!   exchange the result of loading and the exit status, whichever of them
//!   dies first.
//!
//! ## System Calls
//!
//! | No. | Call        | Arguments                   | Returns                |
//! |-----|-------------|-----------------------------|------------------------|
//! | 0   | `halt`      |                             | never returns          |
//! | 1   | `exit`      | status                      | never returns          |
//! | 2   | `exec`      | command line                | pid or -1              |
//! | 3   | `wait`      | pid                         | exit status or -1      |
//! | 4   | `create`    | path, initial size          | true or false          |
//! | 5   | `remove`    | path                        | true or false          |
//! | 6   | `open`      | path                        | fd or -1               |
//! | 7   | `filesize`  | fd                          | size or -1             |
//! | 8   | `read`      | fd, buffer, size            | bytes read or -1       |
//! | 9   | `write`     | fd, buffer, size            | bytes written or -1    |
//! | 10  | `seek`      | fd, position                |                        |
//! | 11  | `tell`      | fd                          | position or -1         |
//! | 12  | `close`     | fd                          |                        |
//! | 13  | `practice`  | i                           | i + 1                  |
//! | 14  | `compute_e` | n                           | e * 10^6 or -1         |
//!
//! A process that passes an invalid pointer is terminated with exit status -1.
//! An unknown system call number only fails the call: `%eax` is set to -1.
//!
//! [`PHYS_BASE`]: keos::addressing::PHYS_BASE
//! [`System Call Infrastructure`]: syscall
//! [`File Descriptor Table`]: file_struct
//! [`Processes`]: process
//! [`Parent-Child Handoff`]: handoff

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod file_struct;
pub mod handoff;
pub mod process;
pub mod syscall;

use core::ops::ControlFlow;
use keos::{KernelError, syscall::Registers, task::Task, warning};
use num_enum::TryFromPrimitive;
use syscall::SyscallAbi;

pub use process::{Pid, Process, Thread};

/// Represents system call numbers.
///
/// Each variant corresponds to a specific system call that can be invoked
/// using the system call interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(usize)]
pub enum SyscallNumber {
    /// Powers off the machine.
    Halt = 0,
    /// Terminates the current process.
    Exit = 1,
    /// Runs a program as a child process.
    Exec = 2,
    /// Waits for a child process to exit.
    Wait = 3,
    /// Creates a file.
    Create = 4,
    /// Removes a file.
    Remove = 5,
    /// Opens a file and returns a file descriptor.
    Open = 6,
    /// Returns the size of an open file.
    Filesize = 7,
    /// Reads data from a file descriptor.
    Read = 8,
    /// Writes data to a file descriptor.
    Write = 9,
    /// Moves the file offset of an open file.
    Seek = 10,
    /// Retrieves the current file offset.
    Tell = 11,
    /// Closes an open file descriptor.
    Close = 12,
    /// Returns its argument plus one.
    Practice = 13,
    /// Approximates the Euler's number.
    ComputeE = 14,
}

impl SyscallNumber {
    /// The number of arguments the system call takes.
    pub fn argc(&self) -> usize {
        match self {
            SyscallNumber::Halt => 0,
            SyscallNumber::Create | SyscallNumber::Seek => 2,
            SyscallNumber::Read | SyscallNumber::Write => 3,
            _ => 1,
        }
    }
}

/// Returns `i + 1`.
pub fn practice(i: i32) -> i32 {
    i.wrapping_add(1)
}

/// Approximates e with the first `n` terms of `Σ 1/k!`, scaled by 10^6 and
/// rounded down.
///
/// At most 32 terms are summed; later terms vanish at this precision.
///
/// # Errors
/// - [`KernelError::InvalidArgument`] if `n` is negative.
pub fn compute_e(n: i32) -> Result<usize, KernelError> {
    const SCALE: u64 = 1_000_000_000_000;
    const MAX_TERMS: u64 = 32;

    let n = u64::try_from(n).map_err(|_| KernelError::InvalidArgument)?;
    let mut term = SCALE;
    let mut sum = 0;
    for k in 0..n.min(MAX_TERMS) {
        if k > 0 {
            term /= k;
        }
        sum += term;
    }
    Ok((sum / (SCALE / 1_000_000)) as usize)
}

impl Thread {
    fn dispatch(&self, regs: &mut Registers) -> Result<ControlFlow<()>, KernelError> {
        let process = self.process.clone();
        let mm = process.address_space().ok_or(KernelError::BadAddress)?;
        let mut abi = SyscallAbi::from_registers(regs, mm)?;
        let no = match SyscallNumber::try_from(abi.sysno) {
            Ok(no) => no,
            Err(_) => {
                abi.set_return_value(Err(KernelError::NoSuchSyscall))?;
                return Ok(ControlFlow::Continue(()));
            }
        };
        abi.load_arguments(no.argc())?;

        #[cfg(feature = "trace_syscall")]
        keos::debug!(
            "{}[{}]: {:?}({:#x}, {:#x}, {:#x})",
            process.name(),
            self.tid,
            no,
            abi.arg1,
            abi.arg2,
            abi.arg3
        );

        let return_val = match no {
            SyscallNumber::Halt => {
                process.halt();
                return Ok(ControlFlow::Break(()));
            }
            SyscallNumber::Exit => {
                process.exit(abi.arg1 as u32 as i32);
                return Ok(ControlFlow::Break(()));
            }
            SyscallNumber::Seek => {
                let _ = process.seek(&abi);
                return Ok(ControlFlow::Continue(()));
            }
            SyscallNumber::Close => {
                let _ = process.close(&abi);
                return Ok(ControlFlow::Continue(()));
            }
            SyscallNumber::Exec => process.exec(&abi),
            SyscallNumber::Wait => process.wait(&abi),
            SyscallNumber::Create => process.create(&abi),
            SyscallNumber::Remove => process.remove(&abi),
            SyscallNumber::Open => process.open(&abi),
            SyscallNumber::Filesize => process.filesize(&abi),
            SyscallNumber::Read => process.read(&abi),
            SyscallNumber::Write => process.write(&abi),
            SyscallNumber::Tell => process.tell(&abi),
            SyscallNumber::Practice => Ok(practice(abi.arg1 as u32 as i32) as u32 as usize),
            SyscallNumber::ComputeE => compute_e(abi.arg1 as u32 as i32),
        };
        abi.set_return_value(return_val)?;
        Ok(ControlFlow::Continue(()))
    }
}

impl Task for Thread {
    /// Handles a system call request from a user program.
    ///
    /// The system call number and its arguments are read from the user stack
    /// through [`SyscallAbi`], the call is routed to its handler, and the
    /// result is stored in `%eax`.
    ///
    /// If the user stack or a pointer argument is invalid, the process is
    /// terminated with exit status -1. An unknown system call number returns
    /// -1 to the program.
    /// Once the process has exited, the thread never returns to the user
    /// program.
    fn syscall(&mut self, regs: &mut Registers) -> ControlFlow<()> {
        if self.process.has_exited() {
            return ControlFlow::Break(());
        }
        match self.dispatch(regs) {
            Ok(ControlFlow::Continue(())) if !self.process.has_exited() => ControlFlow::Continue(()),
            Ok(_) => ControlFlow::Break(()),
            Err(e) => {
                warning!("{}: killed in a system call: {:?}", self.process.name(), e);
                self.process.exit(-1);
                ControlFlow::Break(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_e_converges() {
        assert_eq!(compute_e(0), Ok(0));
        assert_eq!(compute_e(1), Ok(1_000_000));
        assert_eq!(compute_e(2), Ok(2_000_000));
        assert_eq!(compute_e(3), Ok(2_500_000));
        assert_eq!(compute_e(10), Ok(2_718_281));
        assert_eq!(compute_e(32), Ok(2_718_281));
        assert_eq!(compute_e(i32::MAX), Ok(2_718_281));
        assert_eq!(compute_e(-1), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn practice_adds_one() {
        assert_eq!(practice(41), 42);
        assert_eq!(practice(-1), 0);
        assert_eq!(practice(i32::MAX), i32::MIN);
    }

    #[test]
    fn call_numbers_and_arity() {
        assert_eq!(SyscallNumber::try_from(0usize).ok(), Some(SyscallNumber::Halt));
        assert_eq!(
            SyscallNumber::try_from(14usize).ok(),
            Some(SyscallNumber::ComputeE)
        );
        assert!(SyscallNumber::try_from(15usize).is_err());
        assert_eq!(SyscallNumber::Read.argc(), 3);
        assert_eq!(SyscallNumber::Seek.argc(), 2);
        assert_eq!(SyscallNumber::Exec.argc(), 1);
        assert_eq!(SyscallNumber::Halt.argc(), 0);
    }
}
