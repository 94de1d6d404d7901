//! The `uaccess` module provides abstractions for interacting with user-space
//! memory in a kernel context.
//!
//! The types provided by this module include:
//!
//! - [`UserPtrRO`]: A one-time, read-only pointer to a user-space object of
//!   type `T`.
//! - [`UserU8SliceRO`]: A one-time, read-only pointer to a slice of `u8` in
//!   user-space.
//! - [`UserU8SliceWO`]: A one-time, write-only pointer to a slice of `u8` in
//!   user-space.
//! - [`UserCString`]: A utility to handle C-style null-terminated strings from
//!   user-space.
//!
//! Every access goes through the [`AddressSpace`] of the calling process.
//! Fixed-size objects and slices are checked in full with
//! [`AddressSpace::access_ok`] before the first byte is touched. Strings have
//! no known length, so every byte is checked right before it is read, up to
//! and including the terminator. If any byte fails, the operation returns
//! [`KernelError::BadAddress`] instead of causing undefined behavior.
use crate::{
    KernelError,
    addressing::{Kva, Va},
    mm::{AddressSpace, Permission},
};
use alloc::{string::String, vec, vec::Vec};
use core::ops::Range;

fn range_of(addr: usize, len: usize) -> Result<Range<Va>, KernelError> {
    let end = addr.checked_add(len).ok_or(KernelError::BadAddress)?;
    Ok(Va::new(addr).ok_or(KernelError::BadAddress)?..Va::new(end).ok_or(KernelError::BadAddress)?)
}

fn kva_of(mm: &dyn AddressSpace, addr: usize, is_write: bool) -> Result<Kva, KernelError> {
    let required = if is_write {
        Permission::USER | Permission::WRITE
    } else {
        Permission::USER | Permission::READ
    };
    match Va::new(addr).filter(|va| va.is_user()).and_then(|va| mm.translate(va)) {
        Some((kva, perm)) if perm.contains(required) => Ok(kva),
        _ => Err(KernelError::BadAddress),
    }
}

fn copy_in(mm: &dyn AddressSpace, addr: usize, buf: &mut [u8]) -> Result<(), KernelError> {
    for (i, b) in buf.iter_mut().enumerate() {
        let kva = kva_of(mm, addr + i, false)?;
        // Safety: `kva` is the kernel mapping of a readable user byte.
        *b = unsafe { (kva.into_usize() as *const u8).read_volatile() };
    }
    Ok(())
}

fn copy_out(mm: &dyn AddressSpace, addr: usize, buf: &[u8]) -> Result<(), KernelError> {
    for (i, b) in buf.iter().enumerate() {
        let kva = kva_of(mm, addr + i, true)?;
        // Safety: `kva` is the kernel mapping of a writable user byte.
        unsafe { (kva.into_usize() as *mut u8).write_volatile(*b) };
    }
    Ok(())
}

/// A one-time, read-only pointer to a user-space object of type `T`.
///
/// This struct allows the kernel to read from user-space while ensuring
/// safe access patterns. It prevents TOCTOU (Time-of-Check to Time-of-Use)
/// attacks by taking ownership of the pointer during operations.
///
/// # Type Parameter
/// - `T`: The type of the data being accessed. Must implement `Copy`, and
///   every bit pattern must be a valid `T`.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserPtrRO<T>
where
    T: Copy,
{
    addr: usize,
    _ty: core::marker::PhantomData<T>,
}

impl<T> UserPtrRO<T>
where
    T: Copy,
{
    /// Creates a new `UserPtrRO` instance with the given user-space address.
    pub fn new(addr: usize) -> Self {
        UserPtrRO {
            addr,
            _ty: core::marker::PhantomData,
        }
    }

    /// Reads a value of type `T` from the user-space address.
    ///
    /// Takes ownership of `self` to prevent TOCTOU attacks.
    ///
    /// Returns `Ok(T)` if successful, otherwise
    /// `Err(KernelError::BadAddress)`.
    pub fn get(self, mm: &dyn AddressSpace) -> Result<T, KernelError> {
        let size = core::mem::size_of::<T>();
        if !mm.access_ok(range_of(self.addr, size)?, false) {
            return Err(KernelError::BadAddress);
        }
        let mut bytes = vec![0u8; size];
        copy_in(mm, self.addr, &mut bytes)?;
        // Safety: `bytes` holds `size_of::<T>()` bytes, and `T` accepts any bit
        // pattern.
        Ok(unsafe { (bytes.as_ptr() as *const T).read_unaligned() })
    }
}

/// A one-time, read-only pointer to a slice of `u8` in user-space.
///
/// This struct allows the kernel to safely read from a user-space buffer while
/// preventing TOCTOU attacks by taking ownership of the pointer during
/// operations.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserU8SliceRO {
    addr: usize,
    len: usize,
}

impl UserU8SliceRO {
    /// Creates a new `UserU8SliceRO` instance with the given user-space address
    /// and length.
    pub fn new(addr: usize, len: usize) -> Self {
        UserU8SliceRO { addr, len }
    }

    /// Reads data from the user-space buffer into a `Vec<u8>`.
    ///
    /// Takes ownership of `self` to prevent TOCTOU attacks.
    ///
    /// Returns `Ok(Vec<u8>)` containing the data if successful, otherwise
    /// `Err(KernelError::BadAddress)`.
    pub fn get(self, mm: &dyn AddressSpace) -> Result<Vec<u8>, KernelError> {
        if !mm.access_ok(range_of(self.addr, self.len)?, false) {
            return Err(KernelError::BadAddress);
        }
        let mut result = vec![0; self.len];
        copy_in(mm, self.addr, &mut result)?;
        Ok(result)
    }
}

/// A one-time, write-only pointer to a slice of `u8` in user-space.
///
/// This struct allows the kernel to safely write to a user-space buffer while
/// preventing TOCTOU attacks by taking ownership of the pointer during
/// operations.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserU8SliceWO {
    addr: usize,
    len: usize,
}

impl UserU8SliceWO {
    /// Creates a new `UserU8SliceWO` instance with the given user-space address
    /// and length.
    pub fn new(addr: usize, len: usize) -> Self {
        UserU8SliceWO { addr, len }
    }

    /// The length of the user buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks that the whole buffer is writable, without writing to it.
    ///
    /// Used to reject a bad buffer before consuming the data destined to it.
    pub fn check(&self, mm: &dyn AddressSpace) -> Result<(), KernelError> {
        if mm.access_ok(range_of(self.addr, self.len)?, true) {
            Ok(())
        } else {
            Err(KernelError::BadAddress)
        }
    }

    /// Writes data from a slice to the user-space buffer.
    ///
    /// Takes ownership of `self` to prevent TOCTOU attacks.
    ///
    /// Returns `Ok(usize)` indicating the number of bytes written, or
    /// `Err(KernelError::BadAddress)` on failure.
    pub fn put(self, mm: &dyn AddressSpace, other: &[u8]) -> Result<usize, KernelError> {
        let size = self.len.min(other.len());
        self.check(mm)?;
        copy_out(mm, self.addr, &other[..size])?;
        Ok(size)
    }
}

/// A pointer to a null-terminated C-style string in user-space.
///
/// This struct provides a safe abstraction for reading strings from user-space.
/// It iterates over the bytes until a null-terminator (`0x00`) is encountered,
/// converting the byte sequence into a valid UTF-8 `String`.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserCString {
    addr: usize,
}

impl UserCString {
    /// Creates a new `UserCString` instance with the given user-space address.
    pub fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// Reads a null-terminated string from the user-space address.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if the pointer is null, or any byte up to
    ///   the terminator is not readable.
    /// - [`KernelError::InvalidArgument`] if the string is not UTF-8.
    pub fn read(self, mm: &dyn AddressSpace) -> Result<String, KernelError> {
        if self.addr == 0 {
            return Err(KernelError::BadAddress);
        }
        let mut ptr = self.addr;
        let mut result = Vec::new();
        // Iterate over the bytes to find the null-terminator (0x00).
        loop {
            match UserPtrRO::<u8>::new(ptr).get(mm)? {
                0 => {
                    return String::from_utf8(result).map_err(|_| KernelError::InvalidArgument);
                }
                v => {
                    ptr = ptr.checked_add(1).ok_or(KernelError::BadAddress)?;
                    result.push(v);
                }
            }
        }
    }
}
