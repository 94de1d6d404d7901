//! System call infrastructure.
//!
//! A user program requests a system call with the `int $0x30` instruction.
//! Before trapping, it pushes the arguments and then the system call number on
//! its stack, so that at the time of the trap:
//!
//! - `esp` points to the system call number (a 32-bit word),
//! - `esp + 4`, `esp + 8` and `esp + 12` hold the first, second and third
//!   arguments, and
//! - the return value is handed back to the program in `eax`.
//!
//! Every one of these words lives in user memory, and must be read with
//! [`uaccess`].

pub mod uaccess;

/// The user-visible register state captured at the system call trap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// The user stack pointer.
    pub esp: usize,
    /// The return value register.
    pub eax: u32,
}

impl Registers {
    /// Creates a register frame whose stack pointer is `esp`.
    pub fn new(esp: usize) -> Self {
        Self { esp, eax: 0 }
    }
}
