//! A simulated machine to run user programs on.
//!
//! User programs are Rust closures. They run on their own host thread and
//! enter the kernel through [`User`], which lays the system call number and
//! arguments out on the user stack and traps with the stack pointer, exactly
//! like `int $0x30` does.
#![allow(dead_code)]

use keos::{
    KernelError, System, SystemConfigurationBuilder,
    addressing::{Kva, PAGE_SIZE, PHYS_BASE, Va},
    fs::{RegularFile, ramfs::RamFs},
    mm::{AddressSpace, Image, Loader, Permission},
    syscall::Registers,
    task::Task,
    teletype::{InputBuffer, Teletype},
    thread::{ParkHandle, Scheduler, ThreadFn, Tid},
};
use keos_userprog::{Process, SyscallNumber};
use std::{
    cell::UnsafeCell,
    collections::BTreeMap,
    ops::ControlFlow,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

/// A read-write data page.
pub const DATA: usize = 0x0804_8000;
/// A read-only page.
pub const RODATA: usize = 0x0805_0000;
/// An address that is never mapped.
pub const UNMAPPED: usize = 0x1000_0000;
/// The top page of the user stack.
pub const STACK: usize = PHYS_BASE - PAGE_SIZE;
/// The stack pointer at the time of a system call.
pub const SYSCALL_ESP: usize = PHYS_BASE - 64;
/// The value of `eax` before a system call.
pub const UNTOUCHED: u32 = 0xCCCC_CCCC;

/// The exit status of a program whose assertion failed.
pub const PANICKED: i32 = -1000;

/// The magic number of executables.
const MAGIC: &[u8] = b"\x7fELF";

/// The console: keys are pushed into `input`, and everything written is
/// captured.
#[derive(Clone, Default)]
pub struct Console {
    pub input: Arc<InputBuffer>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Teletype for Console {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        self.output.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut read = 0;
        while read < data.len() {
            match self.input.pop() {
                Some(key) => data[read] = key,
                None => break,
            }
            read += 1;
        }
        Ok(read)
    }
}

/// Runs every kernel thread on a host thread.
#[derive(Clone, Default)]
pub struct HostScheduler {
    next_tid: Arc<AtomicU64>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    powered_off: Arc<AtomicBool>,
}

impl HostScheduler {
    /// Waits for every thread, including the ones started meanwhile.
    pub fn join_all(&self) {
        loop {
            let handle = self.threads.lock().unwrap().pop();
            match handle {
                Some(handle) => handle.join().expect("kernel thread panicked"),
                None => break,
            }
        }
    }

    pub fn powered_off(&self) -> bool {
        self.powered_off.load(Ordering::SeqCst)
    }
}

impl Scheduler for HostScheduler {
    fn allocate_tid(&self) -> Tid {
        self.next_tid.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn(&self, tid: Tid, name: &str, thread_fn: ThreadFn) -> Result<(), KernelError> {
        let handle = std::thread::Builder::new()
            .name(format!("{name}-{tid}"))
            .spawn(thread_fn)
            .map_err(|_| KernelError::NoMemory)?;
        self.threads.lock().unwrap().push(handle);
        Ok(())
    }

    fn park_with(&self, f: Box<dyn FnOnce(ParkHandle) + '_>) {
        let unparked = Arc::new(AtomicBool::new(false));
        let thread = std::thread::current();
        let flag = unparked.clone();
        f(ParkHandle::new(move || {
            flag.store(true, Ordering::Release);
            thread.unpark();
        }));
        // `park` may return spuriously.
        while !unparked.load(Ordering::Acquire) {
            std::thread::park();
        }
    }

    fn power_off(&self) {
        self.powered_off.store(true, Ordering::SeqCst);
    }
}

struct Page(Box<UnsafeCell<[u8; PAGE_SIZE]>>);
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

/// The memory of one user process.
#[derive(Clone)]
pub struct Memory(Arc<BTreeMap<usize, (Page, Permission)>>);

impl Memory {
    fn new() -> Self {
        let rw = Permission::READ | Permission::WRITE | Permission::USER;
        let ro = Permission::READ | Permission::USER;
        let pages = [(DATA, rw), (RODATA, ro), (STACK, rw), (PHYS_BASE, rw)]
            .into_iter()
            .map(|(va, perm)| (va, (Page(Box::new(UnsafeCell::new([0; PAGE_SIZE]))), perm)))
            .collect();
        Self(Arc::new(pages))
    }

    fn byte(&self, va: usize) -> *mut u8 {
        let (page, _) = self
            .0
            .get(&(va & !(PAGE_SIZE - 1)))
            .unwrap_or_else(|| panic!("{va:#x} is not mapped"));
        unsafe { (page.0.get() as *mut u8).add(va & (PAGE_SIZE - 1)) }
    }

    /// Writes `data` at `va`, ignoring the permission of the page.
    pub fn poke(&self, va: usize, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            unsafe { self.byte(va + i).write_volatile(*b) };
        }
    }

    /// Reads `len` bytes at `va`.
    pub fn peek(&self, va: usize, len: usize) -> Vec<u8> {
        (va..va + len)
            .map(|va| unsafe { self.byte(va).read_volatile() })
            .collect()
    }
}

impl AddressSpace for Memory {
    fn translate(&self, va: Va) -> Option<(Kva, Permission)> {
        let (page, perm) = self.0.get(&va.page_down().into_usize())?;
        Kva::new(page.0.get() as usize + va.offset()).map(|kva| (kva, *perm))
    }
}

/// Writes `data` at `va` of the address space `mm`, ignoring the permission
/// of the pages.
pub fn poke(mm: &dyn AddressSpace, va: usize, data: &[u8]) {
    for (i, b) in data.iter().enumerate() {
        let (kva, _) = Va::new(va + i)
            .and_then(|va| mm.translate(va))
            .unwrap_or_else(|| panic!("{:#x} is not mapped", va + i));
        unsafe { (kva.into_usize() as *mut u8).write_volatile(*b) };
    }
}

/// Traps into the kernel as `task`, with `no` and `args` laid out at `esp` of
/// `mm`.
pub fn syscall_as(
    task: &mut dyn Task,
    mm: &dyn AddressSpace,
    esp: usize,
    no: SyscallNumber,
    args: &[u32],
) -> Option<u32> {
    let frame: Vec<u8> = std::iter::once(no as u32)
        .chain(args.iter().copied())
        .flat_map(u32::to_le_bytes)
        .collect();
    poke(mm, esp, &frame);
    let mut regs = Registers::new(esp);
    regs.eax = UNTOUCHED;
    match task.syscall(&mut regs) {
        ControlFlow::Continue(()) => Some(regs.eax),
        ControlFlow::Break(()) => None,
    }
}

/// A user program.
pub type Program = Arc<dyn Fn(&mut User<'_>) -> Option<()> + Send + Sync>;

/// Loads the programs installed on the machine.
///
/// An executable is the magic number followed by the name of a program.
#[derive(Clone, Default)]
pub struct ProgramLoader {
    programs: Arc<Mutex<BTreeMap<String, Program>>>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl Loader for ProgramLoader {
    fn load(&self, file: &RegularFile, argv: &[&str]) -> Result<Image, KernelError> {
        let mut image = vec![0; file.size()];
        file.read(0, &mut image)?;
        let key = image.strip_prefix(MAGIC).ok_or(KernelError::NoExec)?;
        let key = std::str::from_utf8(key).map_err(|_| KernelError::NoExec)?;
        let program = self
            .programs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(KernelError::NoExec)?;
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mem = Memory::new();
        let failures = self.failures.clone();
        Ok(Image {
            mm: Box::new(mem.clone()),
            entry: Box::new(move |task: &mut dyn Task| {
                let mut user = User {
                    task,
                    mem,
                    heap: DATA,
                    argv,
                };
                let r = std::panic::catch_unwind(AssertUnwindSafe(|| program(&mut user)));
                if let Err(payload) = r {
                    let message = payload
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                        .unwrap_or_default();
                    failures
                        .lock()
                        .unwrap()
                        .push(format!("{}: {}", user.argv[0], message));
                    user.exit(PANICKED);
                }
            }),
        })
    }
}

/// The view of a running user program.
///
/// Every system call wrapper returns `None` if the kernel did not return to
/// the program.
pub struct User<'a> {
    task: &'a mut dyn Task,
    pub mem: Memory,
    heap: usize,
    pub argv: Vec<String>,
}

impl User<'_> {
    /// Traps into the kernel with the stack pointer `esp`.
    pub fn trap(&mut self, esp: usize) -> (ControlFlow<()>, u32) {
        let mut regs = Registers::new(esp);
        regs.eax = UNTOUCHED;
        let flow = self.task.syscall(&mut regs);
        (flow, regs.eax)
    }

    /// Lays out `no` and `args` at `esp`, and traps.
    pub fn syscall_at(&mut self, esp: usize, no: u32, args: &[u32]) -> Option<u32> {
        let frame: Vec<u8> = std::iter::once(no)
            .chain(args.iter().copied())
            .flat_map(u32::to_le_bytes)
            .collect();
        self.mem.poke(esp, &frame);
        match self.trap(esp) {
            (ControlFlow::Continue(()), eax) => Some(eax),
            (ControlFlow::Break(()), eax) => {
                assert_eq!(eax, UNTOUCHED, "a terminated process got a return value.");
                None
            }
        }
    }

    pub fn syscall(&mut self, no: SyscallNumber, args: &[u32]) -> Option<u32> {
        self.syscall_at(SYSCALL_ESP, no as u32, args)
    }

    /// Allocates `len` bytes on the data page.
    pub fn alloc(&mut self, len: usize) -> u32 {
        let addr = self.heap;
        self.heap += len;
        assert!(self.heap <= DATA + PAGE_SIZE, "out of user memory");
        addr as u32
    }

    /// Copies a null-terminated string to the data page.
    pub fn alloc_str(&mut self, s: &str) -> u32 {
        let addr = self.alloc(s.len() + 1);
        self.mem.poke(addr as usize, s.as_bytes());
        self.mem.poke(addr as usize + s.len(), &[0]);
        addr
    }

    pub fn halt(&mut self) -> Option<()> {
        self.syscall(SyscallNumber::Halt, &[]).map(|_| ())
    }

    pub fn exit(&mut self, status: i32) -> Option<()> {
        self.syscall(SyscallNumber::Exit, &[status as u32])
            .map(|_| ())
    }

    pub fn exec(&mut self, cmdline: &str) -> Option<i32> {
        let ptr = self.alloc_str(cmdline);
        self.syscall(SyscallNumber::Exec, &[ptr]).map(|v| v as i32)
    }

    pub fn wait(&mut self, pid: i32) -> Option<i32> {
        self.syscall(SyscallNumber::Wait, &[pid as u32])
            .map(|v| v as i32)
    }

    pub fn create(&mut self, path: &str, size: u32) -> Option<bool> {
        let ptr = self.alloc_str(path);
        self.syscall(SyscallNumber::Create, &[ptr, size])
            .map(|v| v != 0)
    }

    pub fn remove(&mut self, path: &str) -> Option<bool> {
        let ptr = self.alloc_str(path);
        self.syscall(SyscallNumber::Remove, &[ptr]).map(|v| v != 0)
    }

    pub fn open(&mut self, path: &str) -> Option<i32> {
        let ptr = self.alloc_str(path);
        self.syscall(SyscallNumber::Open, &[ptr]).map(|v| v as i32)
    }

    pub fn filesize(&mut self, fd: i32) -> Option<i32> {
        self.syscall(SyscallNumber::Filesize, &[fd as u32])
            .map(|v| v as i32)
    }

    /// Reads at most `len` bytes from `fd`, and returns the result and the
    /// bytes read.
    pub fn read(&mut self, fd: i32, len: usize) -> Option<(i32, Vec<u8>)> {
        let buf = self.alloc(len);
        let r = self.syscall(SyscallNumber::Read, &[fd as u32, buf, len as u32])? as i32;
        Some((r, self.mem.peek(buf as usize, r.max(0) as usize)))
    }

    pub fn write(&mut self, fd: i32, data: &[u8]) -> Option<i32> {
        let buf = self.alloc(data.len());
        self.mem.poke(buf as usize, data);
        self.syscall(SyscallNumber::Write, &[fd as u32, buf, data.len() as u32])
            .map(|v| v as i32)
    }

    pub fn seek(&mut self, fd: i32, position: u32) -> Option<()> {
        self.syscall(SyscallNumber::Seek, &[fd as u32, position])
            .map(|eax| assert_eq!(eax, UNTOUCHED, "seek returned a value."))
    }

    pub fn tell(&mut self, fd: i32) -> Option<i32> {
        self.syscall(SyscallNumber::Tell, &[fd as u32])
            .map(|v| v as i32)
    }

    pub fn close(&mut self, fd: i32) -> Option<()> {
        self.syscall(SyscallNumber::Close, &[fd as u32])
            .map(|eax| assert_eq!(eax, UNTOUCHED, "close returned a value."))
    }

    pub fn practice(&mut self, i: i32) -> Option<i32> {
        self.syscall(SyscallNumber::Practice, &[i as u32])
            .map(|v| v as i32)
    }

    pub fn compute_e(&mut self, n: i32) -> Option<i32> {
        self.syscall(SyscallNumber::ComputeE, &[n as u32])
            .map(|v| v as i32)
    }
}

/// A machine with an in-memory file system, a captured console, and host
/// threads.
pub struct Machine {
    pub system: Arc<System>,
    pub root: Arc<Process>,
    pub fs: RamFs,
    pub console: Console,
    pub scheduler: HostScheduler,
    loader: ProgramLoader,
}

impl Machine {
    pub fn new() -> Self {
        let fs = RamFs::new();
        let console = Console::default();
        let scheduler = HostScheduler::default();
        let loader = ProgramLoader::default();
        let system = SystemConfigurationBuilder::new()
            .set_filesystem(fs.clone())
            .set_teletype(console.clone())
            .set_scheduler(scheduler.clone())
            .set_loader(loader.clone())
            .build()
            .expect("complete configuration");
        let root = Process::init(system.clone()).expect("root process");
        Self {
            system,
            root,
            fs,
            console,
            scheduler,
            loader,
        }
    }

    /// Installs `program` as the executable `/name`.
    pub fn install<F>(&self, name: &str, program: F)
    where
        F: Fn(&mut User<'_>) -> Option<()> + Send + Sync + 'static,
    {
        self.loader
            .programs
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(program));
        let image = [MAGIC, name.as_bytes()].concat();
        self.fs.add_file(name, &image).expect("install");
    }

    /// Runs `cmdline` as a child of the root process, and waits for it.
    ///
    /// Panics if an assertion of any program failed.
    pub fn run(&self, cmdline: &str) -> i32 {
        let pid = self.root.execute(cmdline).expect("load");
        let status = self.root.wait_child(pid).expect("wait");
        self.check();
        status
    }

    /// Waits for every thread to finish.
    pub fn shutdown(&self) {
        self.scheduler.join_all();
        self.check();
    }

    /// Panics if an assertion of any program failed.
    pub fn check(&self) {
        let failures = self.loader.failures.lock().unwrap();
        assert!(failures.is_empty(), "{}", failures.join("\n"));
    }

    /// Everything written to the console.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.console.output.lock().unwrap()).into_owned()
    }
}
