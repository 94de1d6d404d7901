//! # Parent-child handoff.
//!
//! A parent and each of its children share exactly one [`Handoff`] record.
//! The record outlives whichever side dies first: both hold an [`Arc`] to it,
//! so it is freed when the second one lets go. This is what allows
//!
//! - a child to exit before its parent waits (a *zombie*): the exit status is
//!   kept in the record until the parent collects it, and
//! - a parent to exit without waiting (an *orphan*): the child still reports
//!   its status into the record, which nobody reads.
//!
//! The record carries two events, each signaled once by the child through a
//! zero-initialized [`Semaphore`]:
//!
//! 1. `loaded`: loading finished, successfully or not. The parent blocks on
//!    it inside `exec`.
//! 2. `exited`: the child exited and its status is stored. The parent blocks
//!    on it inside `wait`.
//!
//! The status is always stored under the record's lock before the event is
//! signaled, so a waiter that wakes up always sees it. A parent blocked on an
//! event is parked through the scheduler, not spinning.
//!
//! Once the child is built, the record also points back to its PCB. The
//! pointer is weak: the record never keeps a process alive.

use crate::process::{Pid, Process};
use alloc::{
    string::String,
    sync::{Arc, Weak},
};
use keos::{
    KernelError,
    sync::{Semaphore, SpinLock},
    thread::Scheduler,
};

/// The outcome of loading a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The child has not finished loading.
    Pending,
    /// The child is running.
    Loaded,
    /// The child could not be loaded. This is final.
    Failed,
}

struct HandoffState {
    cmdline: Option<String>,
    process: Weak<Process>,
    load: LoadStatus,
    exit_status: Option<i32>,
    parent_waiting: bool,
}

/// The record shared by a parent and one of its children.
pub struct Handoff {
    pid: Pid,
    loaded: Semaphore,
    exited: Semaphore,
    state: SpinLock<HandoffState>,
}

impl Handoff {
    /// Creates the record of child `pid`, running `cmdline`.
    ///
    /// The returned handle belongs to the parent; the child's handle is a
    /// clone of it.
    pub fn new(pid: Pid, cmdline: String) -> Arc<Self> {
        Arc::new(Self {
            pid,
            loaded: Semaphore::new(0),
            exited: Semaphore::new(0),
            state: SpinLock::new(HandoffState {
                cmdline: Some(cmdline),
                process: Weak::new(),
                load: LoadStatus::Pending,
                exit_status: None,
                parent_waiting: false,
            }),
        })
    }

    /// The pid of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Takes the command line out of the record. Only the first call gets it.
    pub fn take_cmdline(&self) -> Option<String> {
        let mut state = self.state.lock();
        let cmdline = state.cmdline.take();
        state.unlock();
        cmdline
    }

    /// Child side: links the record to the PCB of the child.
    pub fn set_process(&self, process: &Arc<Process>) {
        let mut state = self.state.lock();
        state.process = Arc::downgrade(process);
        state.unlock();
    }

    /// The child process, if it is built and still alive.
    pub fn process(&self) -> Option<Arc<Process>> {
        let state = self.state.lock();
        let process = state.process.upgrade();
        state.unlock();
        process
    }

    /// Child side: publishes the result of loading.
    pub fn report_load(&self, success: bool) {
        let mut state = self.state.lock();
        state.load = if success {
            LoadStatus::Loaded
        } else {
            LoadStatus::Failed
        };
        state.unlock();
        self.loaded.signal();
    }

    /// Parent side: blocks until the child reported the result of loading.
    pub fn wait_load(&self, scheduler: &dyn Scheduler) -> LoadStatus {
        self.loaded.wait(scheduler);
        let state = self.state.lock();
        let load = state.load;
        state.unlock();
        load
    }

    /// Child side: publishes the exit status.
    ///
    /// No waiter is required.
    pub fn report_exit(&self, status: i32) {
        let mut state = self.state.lock();
        state.exit_status = Some(status);
        state.unlock();
        self.exited.signal();
    }

    /// Parent side: claims the right to wait for the child.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchChild`] if the child is already waited for.
    pub fn begin_wait(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let r = if state.parent_waiting {
            Err(KernelError::NoSuchChild)
        } else {
            state.parent_waiting = true;
            Ok(())
        };
        state.unlock();
        r
    }

    /// Parent side: blocks until the child exited, and returns its status.
    pub fn wait_exit(&self, scheduler: &dyn Scheduler) -> i32 {
        self.exited.wait(scheduler);
        let state = self.state.lock();
        // Signaled only after the status is stored.
        let status = state.exit_status.unwrap_or(-1);
        state.unlock();
        status
    }
}
