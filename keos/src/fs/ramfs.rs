//! A file system kept entirely in memory.
//!
//! [`RamFs`] backs the root file system of a machine without a disk, and is
//! filled with the programs to run at boot through [`RamFs::add_file`].

use super::{Directory, File, InodeNumber, NAME_MAX, RegularFile, traits};
use crate::{KernelError, sync::SpinLock};
use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// The largest file [`RamFs`] holds.
pub const MAX_FILE_SIZE: usize = 8 << 20;

const ROOT_INO: InodeNumber = match InodeNumber::new(1) {
    Some(ino) => ino,
    None => panic!("inode 1 is valid"),
};

/// An in-memory file system.
///
/// Clones share the same files.
#[derive(Clone)]
pub struct RamFs {
    root: Arc<RamDirectory>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self {
            root: Arc::new(RamDirectory {
                ino: ROOT_INO,
                entries: SpinLock::new(BTreeMap::new()),
                inodes: Arc::new(AtomicU32::new(ROOT_INO.into_u32() + 1)),
            }),
        }
    }

    /// Adds a regular file holding `contents` to the root directory.
    pub fn add_file(&self, name: &str, contents: &[u8]) -> Result<RegularFile, KernelError> {
        let file = traits::Directory::create_entry(self.root.as_ref(), name, false, 0)?
            .into_regular_file()
            .ok_or(KernelError::IOError)?;
        file.write(0, contents)?;
        Ok(file)
    }
}

impl traits::FileSystem for RamFs {
    fn root(&self) -> Option<Directory> {
        Some(Directory(self.root.clone()))
    }
}

struct RamFile {
    ino: InodeNumber,
    data: SpinLock<Vec<u8>>,
    write_denied: AtomicUsize,
}

impl traits::RegularFile for RamFile {
    fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn size(&self) -> usize {
        let data = self.data.lock();
        let size = data.len();
        data.unlock();
        size
    }

    fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        let len = data.len().saturating_sub(position).min(buf.len());
        if len != 0 {
            buf[..len].copy_from_slice(&data[position..position + len]);
        }
        data.unlock();
        Ok(len)
    }

    fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        if self.write_denied.load(Ordering::Acquire) != 0 {
            return Ok(0);
        }
        let end = position
            .checked_add(buf.len())
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or(KernelError::NoSpace)?;
        let mut data = self.data.lock();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[position..end].copy_from_slice(buf);
        data.unlock();
        Ok(buf.len())
    }

    fn deny_write(&self) {
        self.write_denied.fetch_add(1, Ordering::AcqRel);
    }

    fn allow_write(&self) {
        let _ = self
            .write_denied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cnt| cnt.checked_sub(1));
    }
}

#[derive(Clone)]
enum Entry {
    File(Arc<RamFile>),
    Directory(Arc<RamDirectory>),
}

impl Entry {
    fn to_file(&self) -> File {
        match self {
            Entry::File(f) => File::RegularFile(RegularFile(f.clone())),
            Entry::Directory(d) => File::Directory(Directory(d.clone())),
        }
    }
}

struct RamDirectory {
    ino: InodeNumber,
    entries: SpinLock<BTreeMap<String, Entry>>,
    inodes: Arc<AtomicU32>,
}

impl RamDirectory {
    fn is_empty(&self) -> bool {
        let entries = self.entries.lock();
        let empty = entries.is_empty();
        entries.unlock();
        empty
    }
}

impl traits::Directory for RamDirectory {
    fn ino(&self) -> InodeNumber {
        self.ino
    }

    fn open_entry(&self, entry: &str) -> Result<File, KernelError> {
        let entries = self.entries.lock();
        let file = entries.get(entry).map(Entry::to_file);
        entries.unlock();
        file.ok_or(KernelError::NoSuchEntry)
    }

    fn create_entry(&self, entry: &str, is_dir: bool, size: usize) -> Result<File, KernelError> {
        if entry.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if entry.len() > NAME_MAX {
            return Err(KernelError::NameTooLong);
        }
        if size > MAX_FILE_SIZE {
            return Err(KernelError::NoSpace);
        }
        let ino = InodeNumber::new(self.inodes.fetch_add(1, Ordering::Relaxed))
            .ok_or(KernelError::NoSpace)?;
        let new = if is_dir {
            Entry::Directory(Arc::new(RamDirectory {
                ino,
                entries: SpinLock::new(BTreeMap::new()),
                inodes: self.inodes.clone(),
            }))
        } else {
            Entry::File(Arc::new(RamFile {
                ino,
                data: SpinLock::new(vec![0; size]),
                write_denied: AtomicUsize::new(0),
            }))
        };
        let mut entries = self.entries.lock();
        let result = if entries.contains_key(entry) {
            Err(KernelError::FileExist)
        } else {
            entries.insert(entry.to_string(), new.clone());
            Ok(new.to_file())
        };
        entries.unlock();
        result
    }

    fn unlink_entry(&self, entry: &str) -> Result<(), KernelError> {
        let mut entries = self.entries.lock();
        let result = match entries.get(entry) {
            None => Err(KernelError::NoSuchEntry),
            Some(Entry::Directory(d)) if !d.is_empty() => Err(KernelError::DirectoryNotEmpty),
            Some(_) => Ok(()),
        };
        if result.is_ok() {
            entries.remove(entry);
        }
        entries.unlock();
        result
    }
}
