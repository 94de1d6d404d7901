//! # File descriptor table.
//!
//! A user program names its open files with small integers called **file
//! descriptors**. Each process owns a table, the [`FileStruct`], that maps its
//! descriptors to the files it opened. Descriptors are private to the process:
//! descriptor 5 of one process has nothing to do with descriptor 5 of another,
//! and a process can never reach a file through a descriptor it did not get
//! from `open`.
//!
//! Two descriptors are reserved for the console and never appear in the table:
//!
//! - [`FileDescriptor::STDIN`] (0) reads keys from the keyboard.
//! - [`FileDescriptor::STDOUT`] (1) writes to the console.
//!
//! Every other descriptor is handed out by [`FileStruct::install_file`] in
//! increasing order starting from 2. A closed descriptor is **never** reused:
//! a stale descriptor held by a buggy program keeps failing with
//! [`KernelError::BadFileDescriptor`], instead of silently reaching a file
//! opened later.
//!
//! Each open file tracks its own position. Two descriptors opened on the same
//! file move independently.

use alloc::{collections::BTreeMap, vec, vec::Vec};
use keos::{
    KernelError,
    fs::{Directory, File, FileSystem, RegularFile},
};

/// Represents an index into a process’s file descriptor table.
///
/// A [`FileDescriptor`] is a wrapper around an `i32` that provides stronger
/// type safety when handling these indices in the kernel.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

impl FileDescriptor {
    /// The keyboard.
    pub const STDIN: Self = Self(0);
    /// The console.
    pub const STDOUT: Self = Self(1);
    /// The first descriptor handed out by the table.
    pub const FIRST: Self = Self(2);
}

/// An open file of the table.
#[derive(Clone)]
pub enum FileKind {
    /// A regular file on the filesystem.
    RegularFile {
        /// The underlying file.
        file: RegularFile,
        /// The current position in the file, in bytes from its beginning.
        ///
        /// The next read or write starts here. It may be past the end of the
        /// file.
        position: usize,
    },
    /// A directory of the filesystem.
    ///
    /// A directory can be opened and closed, but not read, written or sized.
    Directory {
        /// The underlying directory.
        dir: Directory,
    },
}

/// The [`FileStruct`] represents the filesystem state of a process, which
/// corresponds to the Linux kernel's `struct files_struct`.
pub struct FileStruct {
    fs: FileSystem,
    /// The current working directory of the process.
    pub cwd: Directory,
    /// The file descriptor table of the process.
    pub files: BTreeMap<FileDescriptor, FileKind>,
    next_fd: FileDescriptor,
}

impl FileStruct {
    /// The maximum number of files open at the same time.
    pub const MAX_OPEN_FILES: usize = 1024;

    /// Creates an empty table resolving relative paths from `cwd`.
    pub fn new(fs: FileSystem, cwd: Directory) -> Self {
        Self {
            fs,
            cwd,
            files: BTreeMap::new(),
            next_fd: FileDescriptor::FIRST,
        }
    }

    /// Installs `file` into the table and returns its new descriptor.
    ///
    /// # Errors
    /// - [`KernelError::TooManyOpenFile`] if the process already has
    ///   [`FileStruct::MAX_OPEN_FILES`] open files, or ran out of descriptors.
    pub fn install_file(&mut self, file: FileKind) -> Result<FileDescriptor, KernelError> {
        if self.files.len() >= Self::MAX_OPEN_FILES {
            return Err(KernelError::TooManyOpenFile);
        }
        let fd = self.next_fd;
        self.next_fd = FileDescriptor(fd.0.checked_add(1).ok_or(KernelError::TooManyOpenFile)?);
        self.files.insert(fd, file);
        Ok(fd)
    }

    /// Creates a regular file of `size` zero bytes at `path`.
    pub fn create(&self, path: &str, size: usize) -> Result<(), KernelError> {
        self.fs.create(&self.cwd, path, size).map(|_| ())
    }

    /// Removes the file or empty directory at `path`.
    ///
    /// Descriptors already open on it keep working.
    pub fn remove(&self, path: &str) -> Result<(), KernelError> {
        self.fs.unlink(&self.cwd, path)
    }

    /// Opens the file or directory at `path`.
    pub fn open(&mut self, path: &str) -> Result<FileDescriptor, KernelError> {
        let kind = match self.fs.open(&self.cwd, path)? {
            File::RegularFile(file) => FileKind::RegularFile { file, position: 0 },
            File::Directory(dir) => FileKind::Directory { dir },
        };
        self.install_file(kind)
    }

    fn regular_file(&mut self, fd: FileDescriptor) -> Result<(&RegularFile, &mut usize), KernelError> {
        match self.files.get_mut(&fd) {
            Some(FileKind::RegularFile { file, position }) => Ok((file, position)),
            Some(FileKind::Directory { .. }) => Err(KernelError::IsDirectory),
            None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Returns the size of the file opened as `fd`, in bytes.
    pub fn size(&mut self, fd: FileDescriptor) -> Result<usize, KernelError> {
        self.regular_file(fd).map(|(file, _)| file.size())
    }

    /// Reads at most `len` bytes from the position of `fd`, and advances it.
    ///
    /// Reading at or past the end of the file returns no bytes.
    pub fn read(&mut self, fd: FileDescriptor, len: usize) -> Result<Vec<u8>, KernelError> {
        let (file, position) = self.regular_file(fd)?;
        let len = len.min(file.size().saturating_sub(*position));
        let mut buf = vec![0; len];
        let read = file.read(*position, &mut buf)?;
        buf.truncate(read);
        *position += read;
        Ok(buf)
    }

    /// Writes `data` at the position of `fd`, and advances it.
    ///
    /// Returns the number of bytes written, which is 0 while the file is the
    /// executable of a running process.
    pub fn write(&mut self, fd: FileDescriptor, data: &[u8]) -> Result<usize, KernelError> {
        let (file, position) = self.regular_file(fd)?;
        let written = file.write(*position, data)?;
        *position += written;
        Ok(written)
    }

    /// Moves the position of `fd` to `position`. It may be past the end of
    /// the file.
    pub fn seek(&mut self, fd: FileDescriptor, position: usize) -> Result<(), KernelError> {
        match self.files.get_mut(&fd) {
            Some(FileKind::RegularFile { position: p, .. }) => {
                *p = position;
                Ok(())
            }
            Some(FileKind::Directory { .. }) => Err(KernelError::IsDirectory),
            None => Err(KernelError::BadFileDescriptor),
        }
    }

    /// Returns the position of `fd`.
    pub fn tell(&mut self, fd: FileDescriptor) -> Result<usize, KernelError> {
        self.regular_file(fd).map(|(_, position)| *position)
    }

    /// Closes `fd`. The descriptor is never handed out again.
    pub fn close(&mut self, fd: FileDescriptor) -> Result<(), KernelError> {
        self.files
            .remove(&fd)
            .map(|_| ())
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Closes every open file.
    pub fn close_all(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keos::fs::ramfs::RamFs;

    fn table() -> (RamFs, FileStruct) {
        let ramfs = RamFs::new();
        ramfs.add_file("notes", b"0123456789").unwrap();
        let fs = FileSystem::new(ramfs.clone());
        let cwd = fs.root().unwrap();
        (ramfs, FileStruct::new(fs, cwd))
    }

    #[test]
    fn descriptors_are_never_reused() {
        let (_, mut files) = table();
        let a = files.open("notes").unwrap();
        let b = files.open("/notes").unwrap();
        assert_eq!((a, b), (FileDescriptor(2), FileDescriptor(3)));

        files.close(a).unwrap();
        assert_eq!(files.close(a), Err(KernelError::BadFileDescriptor));
        let c = files.open("notes").unwrap();
        assert_eq!(c, FileDescriptor(4), "closed descriptor is reused.");
        assert_eq!(files.read(a, 1), Err(KernelError::BadFileDescriptor));
    }

    #[test]
    fn positions_are_per_descriptor() {
        let (_, mut files) = table();
        let a = files.open("notes").unwrap();
        let b = files.open("notes").unwrap();

        assert_eq!(files.read(a, 4).unwrap(), b"0123");
        assert_eq!(files.tell(a), Ok(4));
        assert_eq!(files.tell(b), Ok(0));

        files.seek(b, 8).unwrap();
        assert_eq!(files.read(b, 100).unwrap(), b"89");
        files.seek(b, 100).unwrap();
        assert_eq!(files.read(b, 4).unwrap(), b"");
        assert_eq!(files.size(b), Ok(10));
    }

    #[test]
    fn writes_extend_the_file() {
        let (_, mut files) = table();
        files.create("log", 0).unwrap();
        let fd = files.open("log").unwrap();
        assert_eq!(files.write(fd, b"hello"), Ok(5));
        assert_eq!(files.size(fd), Ok(5));
        files.seek(fd, 0).unwrap();
        assert_eq!(files.read(fd, 5).unwrap(), b"hello");
        assert_eq!(files.create("log", 0), Err(KernelError::FileExist));
    }

    #[test]
    fn directories_are_not_read() {
        let (_, mut files) = table();
        let fd = files.open("/").unwrap();
        assert_eq!(files.read(fd, 1), Err(KernelError::IsDirectory));
        assert_eq!(files.write(fd, b"x"), Err(KernelError::IsDirectory));
        assert_eq!(files.size(fd), Err(KernelError::IsDirectory));
        assert_eq!(files.close(fd), Ok(()));
    }

    #[test]
    fn open_files_are_limited() {
        let (_, mut files) = table();
        for _ in 0..FileStruct::MAX_OPEN_FILES {
            files.open("notes").unwrap();
        }
        assert_eq!(files.open("notes"), Err(KernelError::TooManyOpenFile));
        files.close(FileDescriptor(2)).unwrap();
        assert_eq!(
            files.open("notes"),
            Ok(FileDescriptor(2 + FileStruct::MAX_OPEN_FILES as i32))
        );
        files.close_all();
        assert!(files.files.is_empty());
    }
}
