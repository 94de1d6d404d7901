//! # System call ABI for 32-bit x86.
//!
//! A user program requests a kernel service with the `int $0x30` instruction.
//! Unlike the `syscall` instruction of x86-64, nothing is passed in
//! registers: the program pushes the arguments and then the **system call
//! number** on its own stack before trapping. When the kernel gets control:
//!
//! 1. `%esp` points to the system call number, a 32-bit word.
//! 2. The **arguments** follow as 32-bit words:
//!    - `%esp + 4`: First argument
//!    - `%esp + 8`: Second argument
//!    - `%esp + 12`: Third argument
//! 3. The **return value** is stored to the `%eax` register.
//!
//! ## Reading the Arguments
//!
//! The stack is user memory. The program controls `%esp`, so it may point
//! anywhere: into an unmapped page, into the kernel half of the address space
//! (at or above [`PHYS_BASE`]), or close enough to the end of a page that only
//! part of the argument block is valid. The kernel therefore never
//! dereferences the stack directly. Every word is read through
//! [`keos::syscall::uaccess`], which validates each byte against the address
//! space of the caller before touching it:
//!
//! - [`SyscallAbi::from_registers`] checks and reads the 4 bytes of the system
//!   call number.
//! - [`SyscallAbi::load_arguments`] checks and reads the `4 * argc` bytes of
//!   the arguments, once the number (and so the arity) is known.
//!
//! Pointer arguments (strings and buffers) are validated later, by the handler
//! that uses them.
//!
//! ## Error Handling
//!
//! A failed validation is a [`KernelError::BadAddress`]. Such a program is
//! beyond help: it is terminated with exit status -1, and no value is written
//! back to it. Every other error is returned to the program as `-1` in
//! `%eax`, and the program keeps running.
//!
//! [`PHYS_BASE`]: keos::addressing::PHYS_BASE

use keos::{
    KernelError,
    mm::AddressSpace,
    syscall::{
        Registers,
        uaccess::{UserPtrRO, UserU8SliceRO},
    },
};

/// The size of a word on the user stack.
const WORD: usize = core::mem::size_of::<u32>();

/// A struct representing the system call ABI (Application Binary Interface).
///
/// It stores the system call number and up to three arguments read from the
/// user stack, as well as a mutable reference to the trapped [`Registers`],
/// through which the return value is handed back.
pub struct SyscallAbi<'a> {
    /// The system call number that identifies the requested system service.
    pub sysno: usize,
    /// First argument for the system call.
    pub arg1: usize,
    /// Second argument for the system call.
    pub arg2: usize,
    /// Third argument for the system call.
    pub arg3: usize,
    /// The address space of the caller. Every user pointer is resolved in it.
    pub mm: &'a dyn AddressSpace,
    /// A mutable reference to the [`Registers`] structure, which holds the
    /// state of the CPU registers.
    pub regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// Constructs a [`SyscallAbi`] instance from the provided registers.
    ///
    /// Only the system call number is read; the arguments are zero until
    /// [`SyscallAbi::load_arguments`] is called.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if any byte of the number is not a
    ///   readable user address.
    pub fn from_registers(
        regs: &'a mut Registers,
        mm: &'a dyn AddressSpace,
    ) -> Result<Self, KernelError> {
        let sysno = UserPtrRO::<u32>::new(regs.esp).get(mm)? as usize;
        Ok(Self {
            sysno,
            arg1: 0,
            arg2: 0,
            arg3: 0,
            mm,
            regs,
        })
    }

    /// Reads the first `argc` arguments, which follow the system call number.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if any byte of the `argc` words is not a
    ///   readable user address.
    pub fn load_arguments(&mut self, argc: usize) -> Result<(), KernelError> {
        let argc = argc.min(3);
        let base = self
            .regs
            .esp
            .checked_add(WORD)
            .ok_or(KernelError::BadAddress)?;
        let words = UserU8SliceRO::new(base, WORD * argc).get(self.mm)?;
        let mut args = words
            .chunks_exact(WORD)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) as usize);
        for slot in [&mut self.arg1, &mut self.arg2, &mut self.arg3] {
            *slot = args.next().unwrap_or(0);
        }
        Ok(())
    }

    /// Sets the return value for the system call.
    ///
    /// A success stores the value in `%eax`. An error stores `-1`, except for
    /// [`KernelError::BadAddress`], which cannot be reported to the program
    /// and is handed back to the caller instead; the process must be
    /// terminated.
    pub fn set_return_value(self, return_val: Result<usize, KernelError>) -> Result<(), KernelError> {
        match return_val {
            Ok(v) => self.regs.eax = v as u32,
            Err(KernelError::BadAddress) => return Err(KernelError::BadAddress),
            Err(_) => self.regs.eax = u32::MAX,
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use alloc::{boxed::Box, collections::BTreeMap};
    use core::cell::UnsafeCell;
    use keos::{
        addressing::{Kva, PAGE_SIZE, PHYS_BASE, Va},
        mm::Permission,
    };

    struct Stack(BTreeMap<usize, Box<UnsafeCell<[u8; PAGE_SIZE]>>>);
    unsafe impl Send for Stack {}
    unsafe impl Sync for Stack {}

    impl Stack {
        fn new(pages: &[usize]) -> Self {
            Self(
                pages
                    .iter()
                    .map(|va| (*va, Box::new(UnsafeCell::new([0; PAGE_SIZE]))))
                    .collect(),
            )
        }

        fn push_words(&self, esp: usize, words: &[u32]) {
            for (i, b) in words.iter().flat_map(|w| w.to_le_bytes()).enumerate() {
                let va = esp + i;
                let page = &self.0[&(va & !(PAGE_SIZE - 1))];
                unsafe { (*page.get())[va & (PAGE_SIZE - 1)] = b };
            }
        }
    }

    impl AddressSpace for Stack {
        fn translate(&self, va: Va) -> Option<(Kva, Permission)> {
            let page = self.0.get(&va.page_down().into_usize())?;
            Kva::new(page.get() as usize + va.offset()).map(|kva| {
                (
                    kva,
                    Permission::READ | Permission::WRITE | Permission::USER,
                )
            })
        }
    }

    #[test]
    fn arguments_follow_the_number() {
        let top = PHYS_BASE - PAGE_SIZE;
        let mm = Stack::new(&[top]);
        let esp = top + 0x100;
        mm.push_words(esp, &[9, 1, 0x0804_8000, 12]);

        let mut regs = Registers::new(esp);
        let mut abi = SyscallAbi::from_registers(&mut regs, &mm).unwrap();
        assert_eq!(abi.sysno, 9);
        abi.load_arguments(3).unwrap();
        assert_eq!((abi.arg1, abi.arg2, abi.arg3), (1, 0x0804_8000, 12));
        abi.set_return_value(Ok(12)).unwrap();
        assert_eq!(regs.eax, 12);
    }

    #[test]
    fn argument_block_straddling_the_kernel_boundary() {
        let top = PHYS_BASE - PAGE_SIZE;
        let mm = Stack::new(&[top]);
        // The number fits in the last user word, the argument does not.
        let esp = PHYS_BASE - 4;
        mm.push_words(esp, &[1]);

        let mut regs = Registers::new(esp);
        let mut abi = SyscallAbi::from_registers(&mut regs, &mm).unwrap();
        assert_eq!(abi.sysno, 1);
        assert_eq!(abi.load_arguments(1), Err(KernelError::BadAddress));
        // Nothing to read for a call without arguments.
        assert_eq!(abi.load_arguments(0), Ok(()));

        let mut regs = Registers::new(PHYS_BASE - 2);
        assert!(SyscallAbi::from_registers(&mut regs, &mm).is_err());
    }

    #[test]
    fn errors_become_minus_one_unless_fatal() {
        let top = PHYS_BASE - PAGE_SIZE;
        let mm = Stack::new(&[top]);
        let mut regs = Registers::new(top);

        let abi = SyscallAbi::from_registers(&mut regs, &mm).unwrap();
        abi.set_return_value(Err(KernelError::BadFileDescriptor))
            .unwrap();
        assert_eq!(regs.eax as i32, -1);

        regs.eax = 0;
        let abi = SyscallAbi::from_registers(&mut regs, &mm).unwrap();
        abi.set_return_value(Err(KernelError::NoSuchSyscall))
            .unwrap();
        assert_eq!(regs.eax as i32, -1, "an unknown call must fail, not kill.");

        regs.eax = 7;
        let abi = SyscallAbi::from_registers(&mut regs, &mm).unwrap();
        assert_eq!(
            abi.set_return_value(Err(KernelError::BadAddress)),
            Err(KernelError::BadAddress)
        );
        assert_eq!(regs.eax, 7, "a fatal error must not produce a return value.");
    }
}
