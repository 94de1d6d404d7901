//! Filesystem abstraction.
//!
//! The storage itself lives behind the [`traits`] module. The kernel works with
//! reference-counted handles ([`RegularFile`], [`Directory`]) and resolves
//! paths through [`FileSystem`]. [`ramfs`] is a file system kept entirely in
//! memory.

/// Defines traits for file system operations.
pub mod traits {
    use super::{File, InodeNumber};
    use crate::KernelError;

    /// Trait representing a filesystem.
    ///
    /// This trait provides access to the root directory of the filesystem,
    /// allowing operations on files and directories.
    pub trait FileSystem
    where
        Self: Sync + Send,
    {
        /// Retrieves the root directory of the filesystem.
        ///
        /// # Returns
        /// - `Some(Directory)`: A reference to the root directory if available.
        /// - `None`: If the root directory is inaccessible or the filesystem is
        ///   uninitialized.
        fn root(&self) -> Option<super::Directory>;
    }

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports basic read and write
    /// operations.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the inode number of the file.
        fn ino(&self) -> InodeNumber;

        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads data at `position` into the provided buffer.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes read. Reading at or past the end
        ///   of the file reads 0 bytes.
        /// - `Err(Error)`: An error occured while the read operation.
        fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` at `position`, extending the file if needed.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes written. While writes to the
        ///   file are denied, nothing is written and `Ok(0)` is returned.
        /// - `Err(Error)`: An error occured while the write operation.
        fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError>;

        /// Denies writes to the file until a matching
        /// [`RegularFile::allow_write`].
        ///
        /// Denials nest and apply to every handle of the same file.
        fn deny_write(&self);

        /// Re-allows writes denied by [`RegularFile::deny_write`].
        fn allow_write(&self);
    }

    /// Trait representing a directory in the filesystem.
    ///
    /// A directory maps names to files or other directories.
    pub trait Directory
    where
        Self: Send + Sync,
    {
        /// Returns the inode number of the directory.
        fn ino(&self) -> InodeNumber;

        /// Opens an entry of this directory.
        ///
        /// # Errors
        /// - [`KernelError::NoSuchEntry`] if the entry does not exist.
        fn open_entry(&self, entry: &str) -> Result<File, KernelError>;

        /// Creates an entry in this directory.
        ///
        /// A regular file is created with `size` zero bytes.
        ///
        /// # Errors
        /// - [`KernelError::FileExist`] if the entry already exists.
        fn create_entry(&self, entry: &str, is_dir: bool, size: usize)
        -> Result<File, KernelError>;

        /// Removes an entry from this directory.
        ///
        /// Open handles of the removed file stay usable.
        fn unlink_entry(&self, entry: &str) -> Result<(), KernelError>;
    }
}

pub mod ramfs;

use crate::KernelError;
use alloc::{sync::Arc, vec::Vec};
use core::num::NonZeroU32;

/// The maximum length of a single path component, in bytes.
pub const NAME_MAX: usize = 14;

/// A file system mounted on the machine.
///
/// The [`FileSystem`] struct resolves paths into files, relative to a working
/// directory, or from the root when the path starts with `/`.
#[derive(Clone)]
pub struct FileSystem(Arc<dyn traits::FileSystem>);

impl FileSystem {
    /// Mounts a file system.
    pub fn new(fs: impl traits::FileSystem + 'static) -> Self {
        Self(Arc::new(fs))
    }

    /// Retrieves the root directory of the filesystem.
    ///
    /// # Errors
    /// - [`KernelError::IOError`] if the file system has no root.
    pub fn root(&self) -> Result<Directory, KernelError> {
        self.0.root().ok_or(KernelError::IOError)
    }

    /// Splits `path` into its starting directory and its components.
    fn walk_from<'p>(
        &self,
        cwd: &Directory,
        path: &'p str,
    ) -> Result<(Directory, Vec<&'p str>), KernelError> {
        if path.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let start = if path.starts_with('/') {
            self.root()?
        } else {
            cwd.clone()
        };
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.iter().any(|part| part.len() > NAME_MAX) {
            return Err(KernelError::NameTooLong);
        }
        Ok((start, parts))
    }

    /// Resolves every component but the last one.
    fn parent_of<'p>(
        &self,
        cwd: &Directory,
        path: &'p str,
    ) -> Result<(Directory, &'p str), KernelError> {
        let (mut dir, mut parts) = self.walk_from(cwd, path)?;
        let entry = parts.pop().ok_or(KernelError::InvalidArgument)?;
        for part in parts {
            dir = dir
                .0
                .open_entry(part)?
                .into_directory()
                .ok_or(KernelError::NotDirectory)?;
        }
        Ok((dir, entry))
    }

    /// Opens a path.
    ///
    /// # Returns
    /// - `Ok(File)`: The type of the file (e.g., regular file, directory).
    /// - `Err(Error)`: An error if the entry cannot be found or accessed.
    pub fn open(&self, cwd: &Directory, path: &str) -> Result<File, KernelError> {
        let (dir, parts) = self.walk_from(cwd, path)?;
        let mut ret = File::Directory(dir);
        for part in parts {
            match ret {
                File::Directory(d) => ret = d.0.open_entry(part)?,
                File::RegularFile(_) => return Err(KernelError::NotDirectory),
            }
        }
        Ok(ret)
    }

    /// Creates a regular file of `size` zero bytes at `path`.
    pub fn create(&self, cwd: &Directory, path: &str, size: usize) -> Result<File, KernelError> {
        let (dir, entry) = self.parent_of(cwd, path)?;
        dir.0.create_entry(entry, false, size)
    }

    /// Creates a directory at `path`.
    pub fn mkdir(&self, cwd: &Directory, path: &str) -> Result<File, KernelError> {
        let (dir, entry) = self.parent_of(cwd, path)?;
        dir.0.create_entry(entry, true, 0)
    }

    /// Unlinks the entry at `path`.
    pub fn unlink(&self, cwd: &Directory, path: &str) -> Result<(), KernelError> {
        let (dir, entry) = self.parent_of(cwd, path)?;
        dir.0.unlink_entry(entry)
    }
}

/// A handle to a regular file.
///
/// This struct provides a reference-counted handle to a file that supports
/// reading and writing operations at the kernel level.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode number of the file.
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads data at `position` into the provided buffer.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        if position >= self.size() {
            return Ok(0);
        }
        self.0.read(position, buf)
    }

    /// Writes data from the buffer into the file.
    ///
    /// If the write position is beyond the current file size, file will be
    /// extended to minimum size required to reflect the update.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write(position, buf)
    }

    /// Denies writes to the file.
    #[inline]
    pub fn deny_write(&self) {
        self.0.deny_write()
    }

    /// Re-allows writes to the file.
    #[inline]
    pub fn allow_write(&self) {
        self.0.allow_write()
    }
}

/// A handle to a directory.
///
/// This struct represents a reference-counted directory that supports
/// file entry management, including opening and removing entries.
#[derive(Clone)]
pub struct Directory(pub Arc<dyn traits::Directory>);

impl Directory {
    /// Creates a new [`Directory`] handle from a given implementation of
    /// [`traits::Directory`].
    pub fn new(r: impl traits::Directory + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode number of the directory.
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }
}

/// Represents a file system entry, which can be either a file or a directory.
#[derive(Clone)]
pub enum File {
    /// A regular file.
    RegularFile(RegularFile),
    /// A directory.
    Directory(Directory),
}

impl File {
    /// Converts the [`File`] into a [`RegularFile`], if it is one.
    pub fn into_regular_file(self) -> Option<RegularFile> {
        if let File::RegularFile(r) = self {
            Some(r)
        } else {
            None
        }
    }

    /// Converts the [`File`] into a [`Directory`], if it is one.
    pub fn into_directory(self) -> Option<Directory> {
        if let File::Directory(d) = self {
            Some(d)
        } else {
            None
        }
    }

    /// Get [`InodeNumber`] of this [`File`] regardless of its inner type.
    pub fn ino(&self) -> InodeNumber {
        match self {
            File::RegularFile(r) => r.ino(),
            File::Directory(d) => d.ino(),
        }
    }
}

/// The inode number of a file, unique within a file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InodeNumber(NonZeroU32);

impl InodeNumber {
    /// Creates an inode number. Inode 0 does not exist.
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// The raw inode number.
    pub fn into_u32(&self) -> u32 {
        self.0.get()
    }
}
