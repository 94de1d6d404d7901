//! # Processes.
//!
//! A **process** is a running user program: an address space, a table of open
//! files, and the executable it was loaded from. Its threads enter the kernel
//! through a [`Thread`], which carries a handle to the process.
//!
//! ## Life of a Process
//!
//! A process is born from the `exec` system call of its parent
//! ([`Process::execute`]). The parent allocates the child's pid, creates the
//! [`Handoff`] record they will share, and starts the child's main thread.
//! The new thread then
//!
//! 1. splits the command line into arguments at whitespace,
//! 2. opens the executable named by the first argument from the root
//!    directory, and denies writes to it,
//! 3. asks the [`Loader`] for an address space and an entry point,
//! 4. reports whether all of this succeeded, and finally
//! 5. jumps into the program.
//!
//! The parent does not return from `exec` before step 4: a pid handed out by
//! `exec` always belongs to a program that started running.
//!
//! A process ends with [`Process::exit`], either voluntarily with the `exit`
//! system call, or because the kernel killed it. The exit status is reported
//! to the parent through the handoff record, where it stays until the parent
//! collects it with [`Process::wait_child`]. Neither side has to outlive the
//! other (see [`crate::handoff`]).
//!
//! While a process runs, its executable cannot be modified. Writes are
//! re-allowed when the process exits.
//!
//! [`Loader`]: keos::mm::Loader

use crate::{
    file_struct::{FileDescriptor, FileStruct},
    handoff::{Handoff, LoadStatus},
    syscall::SyscallAbi,
};
use alloc::{
    boxed::Box,
    collections::BTreeMap,
    format,
    string::String,
    sync::Arc,
    vec::Vec,
};
use arrayvec::ArrayString;
use core::sync::atomic::{AtomicBool, Ordering};
use keos::{
    KernelError, System, debug,
    fs::RegularFile,
    mm::{AddressSpace, Entry, Image},
    sync::SpinLock,
    syscall::uaccess::{UserCString, UserU8SliceRO, UserU8SliceWO},
    teletype,
    thread::{ThreadBuilder, Tid},
    warning,
};

/// A process identifier. The pid of a process is the tid of its main thread.
pub type Pid = Tid;

/// The longest process name, in bytes. Longer program names are truncated.
pub const NAME_LEN: usize = 15;

fn process_name(program: &str) -> ArrayString<NAME_LEN> {
    let mut name = ArrayString::new();
    for c in program.chars() {
        if name.try_push(c).is_err() {
            break;
        }
    }
    name
}

/// The executable of a running process.
///
/// Writes to the file are denied for as long as this is alive.
struct Executable(RegularFile);

impl Executable {
    fn open(file: RegularFile) -> Self {
        file.deny_write();
        Self(file)
    }
}

impl Drop for Executable {
    fn drop(&mut self) {
        self.0.allow_write();
    }
}

/// Interprets a system call argument as a signed 32-bit integer.
#[inline]
fn as_i32(arg: usize) -> i32 {
    arg as u32 as i32
}

/// Maps a result of `create` or `remove` to the boolean seen by the user.
fn as_bool(r: Result<(), KernelError>) -> Result<usize, KernelError> {
    match r {
        Ok(()) => Ok(1),
        Err(KernelError::BadAddress) => Err(KernelError::BadAddress),
        Err(_) => Ok(0),
    }
}

/// A process control block.
pub struct Process {
    pid: Pid,
    name: ArrayString<NAME_LEN>,
    system: Arc<System>,
    mm: Option<Box<dyn AddressSpace>>,
    executable: SpinLock<Option<Executable>>,
    /// The open files of the process.
    pub file_struct: SpinLock<FileStruct>,
    children: SpinLock<BTreeMap<Pid, Arc<Handoff>>>,
    parent: SpinLock<Option<Arc<Handoff>>>,
    exited: AtomicBool,
}

impl Process {
    /// Creates the kernel's own process, the ancestor of every user program.
    ///
    /// It has no address space and no parent, and prints no exit message.
    pub fn init(system: Arc<System>) -> Result<Arc<Self>, KernelError> {
        let fs = system.file_system().clone();
        let root = fs.root()?;
        let pid = system.scheduler().allocate_tid();
        Ok(Arc::new(Self {
            pid,
            name: process_name("main"),
            mm: None,
            executable: SpinLock::new(None),
            file_struct: SpinLock::new(FileStruct::new(fs, root)),
            children: SpinLock::new(BTreeMap::new()),
            parent: SpinLock::new(None),
            exited: AtomicBool::new(false),
            system,
        }))
    }

    /// Builds the process described by `cmdline`, as the child of `link`.
    fn load(
        system: Arc<System>,
        pid: Pid,
        cmdline: &str,
        link: Arc<Handoff>,
    ) -> Result<(Arc<Self>, Entry), KernelError> {
        let argv: Vec<&str> = cmdline.split_ascii_whitespace().collect();
        let program = *argv.first().ok_or(KernelError::InvalidArgument)?;
        let fs = system.file_system().clone();
        let root = fs.root()?;
        let file = fs
            .open(&root, program)?
            .into_regular_file()
            .ok_or(KernelError::IsDirectory)?;
        let executable = Executable::open(file);
        let Image { mm, entry } = system.loader().load(&executable.0, &argv)?;
        let process = Arc::new(Self {
            pid,
            name: process_name(program),
            mm: Some(mm),
            executable: SpinLock::new(Some(executable)),
            file_struct: SpinLock::new(FileStruct::new(fs, root)),
            children: SpinLock::new(BTreeMap::new()),
            parent: SpinLock::new(Some(link.clone())),
            exited: AtomicBool::new(false),
            system,
        });
        link.set_process(&process);
        Ok((process, entry))
    }

    /// The pid of the process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The name of the process, the (truncated) name of its program.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address space of the process, if it runs a user program.
    pub fn address_space(&self) -> Option<&dyn AddressSpace> {
        self.mm.as_deref()
    }

    /// Returns true once the process has exited.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// The pids of the children not yet waited for.
    pub fn children(&self) -> Vec<Pid> {
        let children = self.children.lock();
        let pids = children.keys().copied().collect();
        children.unlock();
        pids
    }

    /// The record shared with the child `pid`, if it is not waited for yet.
    pub fn child(&self, pid: Pid) -> Option<Arc<Handoff>> {
        let children = self.children.lock();
        let record = children.get(&pid).cloned();
        children.unlock();
        record
    }

    /// Starts a child process running `cmdline`, and returns its pid once it
    /// is loaded.
    ///
    /// # Errors
    /// - [`KernelError::NoExec`] if the program cannot be loaded.
    /// - Any error of the scheduler if the main thread cannot be created.
    pub fn execute(self: &Arc<Self>, cmdline: &str) -> Result<Pid, KernelError> {
        let program = cmdline.split_ascii_whitespace().next().unwrap_or_default();
        let builder = ThreadBuilder::new(self.system.scheduler(), process_name(program).as_str());
        let pid = builder.get_tid();
        let record = Handoff::new(pid, String::from(cmdline));
        let link = record.clone();
        let system = self.system.clone();
        builder
            .spawn(move || start_process(system, link))
            .inspect_err(|e| warning!("{}: cannot start `{}`: {:?}", self.name, program, e))?;

        match record.wait_load(self.system.scheduler()) {
            LoadStatus::Loaded => {
                let mut children = self.children.lock();
                children.insert(pid, record);
                children.unlock();
                Ok(pid)
            }
            LoadStatus::Pending | LoadStatus::Failed => {
                debug!("{}: failed to load `{}`.", self.name, cmdline);
                Err(KernelError::NoExec)
            }
        }
    }

    /// Waits for the child `pid` to exit, and returns its exit status.
    ///
    /// A child that has already exited is collected immediately. Each child can
    /// be waited for only once.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchChild`] if `pid` is not a child of this process,
    ///   or is already waited for.
    pub fn wait_child(&self, pid: Pid) -> Result<i32, KernelError> {
        let record = self.child(pid).ok_or(KernelError::NoSuchChild)?;
        record.begin_wait()?;
        let status = record.wait_exit(self.system.scheduler());

        let mut children = self.children.lock();
        children.remove(&pid);
        children.unlock();
        Ok(status)
    }

    /// Terminates the process with `status`.
    ///
    /// Only the first call has an effect. Every later system call of the
    /// process's threads does not return to the user program.
    pub fn exit(&self, status: i32) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.mm.is_some() {
            let message = format!("{}: exit({})\n", self.name, status);
            let _ = teletype::write(self.system.teletype(), message.as_bytes());
        }

        // The parent may return from `wait` before the files and the
        // executable below are released.
        let mut parent = self.parent.lock();
        let link = parent.take();
        parent.unlock();
        if let Some(link) = link {
            link.report_exit(status);
        }

        let mut file_struct = self.file_struct.lock();
        file_struct.close_all();
        file_struct.unlock();

        let mut executable = self.executable.lock();
        let executable_file = executable.take();
        executable.unlock();
        drop(executable_file);

        // Running children become orphans, exited ones are reclaimed.
        let mut children = self.children.lock();
        let records = core::mem::take(&mut *children);
        children.unlock();
        drop(records);
    }

    /// Powers off the machine.
    pub fn halt(&self) {
        debug!("{}: halt.", self.name);
        self.system.scheduler().power_off();
    }

    /// Runs a program as a child process.
    ///
    /// # Syscall API
    /// ```c
    /// pid_t exec(const char *cmd_line);
    /// ```
    /// Returns the pid of the child, or -1 if it cannot be loaded.
    pub fn exec(self: &Arc<Self>, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let cmdline = UserCString::new(abi.arg1).read(abi.mm)?;
        self.execute(&cmdline).map(|pid| pid as usize)
    }

    /// Waits for a child process to exit.
    ///
    /// # Syscall API
    /// ```c
    /// int wait(pid_t pid);
    /// ```
    /// Returns the exit status of the child, or -1 if `pid` is not a child or
    /// is already waited for.
    pub fn wait(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let pid = Pid::try_from(as_i32(abi.arg1)).map_err(|_| KernelError::NoSuchChild)?;
        self.wait_child(pid).map(|status| status as u32 as usize)
    }

    /// Creates a file.
    ///
    /// # Syscall API
    /// ```c
    /// bool create(const char *file, unsigned initial_size);
    /// ```
    pub fn create(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        as_bool(UserCString::new(abi.arg1).read(abi.mm).and_then(|path| {
            let file_struct = self.file_struct.lock();
            let r = file_struct.create(&path, abi.arg2);
            file_struct.unlock();
            r
        }))
    }

    /// Removes a file.
    ///
    /// # Syscall API
    /// ```c
    /// bool remove(const char *file);
    /// ```
    pub fn remove(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        as_bool(UserCString::new(abi.arg1).read(abi.mm).and_then(|path| {
            let file_struct = self.file_struct.lock();
            let r = file_struct.remove(&path);
            file_struct.unlock();
            r
        }))
    }

    /// Opens a file.
    ///
    /// # Syscall API
    /// ```c
    /// int open(const char *file);
    /// ```
    pub fn open(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path = UserCString::new(abi.arg1).read(abi.mm)?;
        let mut file_struct = self.file_struct.lock();
        let r = file_struct.open(&path);
        file_struct.unlock();
        r.map(|fd| fd.0 as usize)
    }

    /// Returns the size of an open file.
    ///
    /// # Syscall API
    /// ```c
    /// int filesize(int fd);
    /// ```
    pub fn filesize(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let mut file_struct = self.file_struct.lock();
        let r = file_struct.size(FileDescriptor(as_i32(abi.arg1)));
        file_struct.unlock();
        r
    }

    /// Reads from an open file, or from the keyboard.
    ///
    /// # Syscall API
    /// ```c
    /// int read(int fd, void *buffer, unsigned size);
    /// ```
    /// Reading from [`FileDescriptor::STDIN`] waits until `size` keys are
    /// pressed.
    pub fn read(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let buf = UserU8SliceWO::new(abi.arg2, abi.arg3);
        buf.check(abi.mm)?;
        let data = match FileDescriptor(as_i32(abi.arg1)) {
            FileDescriptor::STDIN => (0..buf.len())
                .map(|_| teletype::getc(self.system.teletype()))
                .collect::<Result<Vec<u8>, _>>()?,
            FileDescriptor::STDOUT => return Err(KernelError::BadFileDescriptor),
            fd => {
                let mut file_struct = self.file_struct.lock();
                let r = file_struct.read(fd, buf.len());
                file_struct.unlock();
                r?
            }
        };
        buf.put(abi.mm, &data)
    }

    /// Writes to an open file, or to the console.
    ///
    /// # Syscall API
    /// ```c
    /// int write(int fd, const void *buffer, unsigned size);
    /// ```
    /// Writes to [`FileDescriptor::STDOUT`] are never interleaved with the
    /// output of other processes.
    pub fn write(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let data = UserU8SliceRO::new(abi.arg2, abi.arg3).get(abi.mm)?;
        match FileDescriptor(as_i32(abi.arg1)) {
            FileDescriptor::STDOUT => teletype::write(self.system.teletype(), &data),
            FileDescriptor::STDIN => Err(KernelError::BadFileDescriptor),
            fd => {
                let mut file_struct = self.file_struct.lock();
                let r = file_struct.write(fd, &data);
                file_struct.unlock();
                r
            }
        }
    }

    /// Moves the position of an open file.
    ///
    /// # Syscall API
    /// ```c
    /// void seek(int fd, unsigned position);
    /// ```
    pub fn seek(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let mut file_struct = self.file_struct.lock();
        let r = file_struct.seek(FileDescriptor(as_i32(abi.arg1)), abi.arg2);
        file_struct.unlock();
        r.map(|_| 0)
    }

    /// Returns the position of an open file.
    ///
    /// # Syscall API
    /// ```c
    /// unsigned tell(int fd);
    /// ```
    pub fn tell(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let mut file_struct = self.file_struct.lock();
        let r = file_struct.tell(FileDescriptor(as_i32(abi.arg1)));
        file_struct.unlock();
        r
    }

    /// Closes an open file.
    ///
    /// # Syscall API
    /// ```c
    /// void close(int fd);
    /// ```
    pub fn close(&self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let mut file_struct = self.file_struct.lock();
        let r = file_struct.close(FileDescriptor(as_i32(abi.arg1)));
        file_struct.unlock();
        r.map(|_| 0)
    }
}

/// A thread of a process.
///
/// User programs enter the kernel through the [`keos::task::Task`]
/// implementation of this struct.
pub struct Thread {
    /// The id of the thread.
    pub tid: Tid,
    /// The process the thread belongs to.
    pub process: Arc<Process>,
}

/// The body of the main thread of a new process.
fn start_process(system: Arc<System>, link: Arc<Handoff>) {
    let pid = link.pid();
    let loaded = link
        .take_cmdline()
        .ok_or(KernelError::InvalidArgument)
        .and_then(|cmdline| Process::load(system, pid, &cmdline, link.clone()));

    match loaded {
        Ok((process, entry)) => {
            link.report_load(true);
            drop(link);
            let mut thread = Thread { tid: pid, process };
            entry(&mut thread);
            // The program returned without calling exit.
            thread.process.exit(-1);
        }
        Err(e) => {
            debug!("process {}: load failed: {:?}", pid, e);
            link.report_load(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_truncated_on_char_boundaries() {
        assert_eq!(process_name("echo").as_str(), "echo");
        assert_eq!(
            process_name("a-very-long-program-name").as_str(),
            "a-very-long-pro"
        );
        // 'é' takes two bytes and does not fit at offset 14.
        assert_eq!(process_name("abcdefghijklmné").as_str(), "abcdefghijklmn");
    }

    #[test]
    fn boolean_results_keep_fatal_errors() {
        assert_eq!(as_bool(Ok(())), Ok(1));
        assert_eq!(as_bool(Err(KernelError::NoSuchEntry)), Ok(0));
        assert_eq!(as_bool(Err(KernelError::InvalidArgument)), Ok(0));
        assert_eq!(
            as_bool(Err(KernelError::BadAddress)),
            Err(KernelError::BadAddress)
        );
    }
}
