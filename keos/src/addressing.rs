//! User and Kernel Virtual Addressing Schemes.
//!
//! A user process sees a 32-bit virtual address space. Addresses below
//! [`PHYS_BASE`] belong to the user, and everything above it is reserved for
//! the kernel. A user address is represented with [`Va`]; it is meaningless to
//! the kernel until it is translated through the process's address space into
//! a [`Kva`], the kernel's own mapping of the same byte.
//!
//! ## Example Usage:
//!
//! ```
//! use keos::addressing::{Va, PAGE_SIZE};
//!
//! let va = Va::new(0x0804_8123).unwrap();
//! assert!(va.is_user());
//! assert_eq!(va.page_down().into_usize(), 0x0804_8000);
//! assert_eq!(va.offset(), 0x123);
//! assert_eq!((va.page_down() + PAGE_SIZE).into_usize(), 0x0804_9000);
//! ```

/// The size of a single page in memory, in bytes.
///
/// This constant represents the size of a memory page, which is 4 KiB
/// (kilobytes). Validity of a user address is decided per page.
pub const PAGE_SIZE: usize = 0x1000;

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// The base of the kernel address space.
///
/// Every user address is strictly below this address.
pub const PHYS_BASE: usize = 0xC000_0000;

/// The end of the 32-bit virtual address space.
const VA_LIMIT: usize = 1 << 32;

/// Represents a user virtual address.
///
/// The [`Va`] (Virtual Address) struct represents an address in the 32-bit
/// virtual memory space of a process. Creating a [`Va`] does not mean the
/// address is accessible; the owning address space decides that.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is representable.
    ///
    /// # Returns
    /// - `Some(Va)`: If the address fits in the 32-bit address space. The end
    ///   of the address space itself is accepted as an exclusive range bound.
    /// - `None`: If the address is invalid.
    ///
    /// # Example
    /// ```
    /// use keos::addressing::Va;
    ///
    /// assert!(Va::new(0x1000).is_some());
    /// assert!(Va::new(0x1_0000_0001).is_none());
    /// ```
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr <= VA_LIMIT {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the raw `usize` representation of the virtual address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Returns true if the address is below [`PHYS_BASE`].
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    /// Aligns the virtual address down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Extracts the page offset from the virtual address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl core::ops::Add<usize> for Va {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va({:#x})", self.0)
    }
}

/// Represents a kernel virtual address.
///
/// A [`Kva`] is the address through which the kernel itself reaches a byte of
/// memory. It is produced by translating a [`Va`] in an address space, and is
/// the only kind of address the kernel dereferences.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Kva(usize);

impl Kva {
    /// Creates a new kernel virtual address.
    ///
    /// Returns `None` for the null address.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr != 0 { Some(Self(addr)) } else { None }
    }

    /// Returns the raw `usize` representation of the kernel address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }
}

impl core::fmt::Debug for Kva {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Kva({:#x})", self.0)
    }
}
