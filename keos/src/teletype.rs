//! A teletype (TTY) interface for character-based I/O.
//!
//! This module provides a trait [`Teletype`] that defines an interface for
//! reading from and writing to a teletype device, such as a serial port.
//! The [`Serial`] struct implements this interface on top of the kernel
//! serial sink and an [`InputBuffer`] filled by the keyboard.

use crate::{KernelError, sync::SpinLock};
use alloc::{boxed::Box, string::String, sync::Arc};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;

/// The `Teletype` trait represents a generic character-based input/output
/// device.
///
/// Implementations of this trait define methods for:
/// - Writing data to the teletype (`write`)
/// - Reading data from the teletype (`read`)
///
/// This abstraction allows for different kinds of terminal or serial interfaces
/// to implement their own communication methods.
pub trait Teletype: Send {
    /// Writes data to the teletype.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes successfully written.
    /// - `Err(KernelError)`: If the write operation failed.
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError>;

    /// Reads the data available on the teletype without blocking.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes read, `0` when no input is pending.
    /// - `Err(KernelError)`: If the read operation failed.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError>;
}

/// Writes `data` to the console as a single operation.
///
/// Output of concurrent writers is never interleaved within one call.
pub fn write(tty: &SpinLock<Box<dyn Teletype>>, data: &[u8]) -> Result<usize, KernelError> {
    let mut guard = tty.lock();
    let r = guard.write(data);
    guard.unlock();
    r
}

/// Retrieves a key from the console, waiting until one is pressed.
///
/// The console lock is not held while waiting.
pub fn getc(tty: &SpinLock<Box<dyn Teletype>>) -> Result<u8, KernelError> {
    let backoff = Backoff::new();
    let mut byte = [0u8; 1];
    loop {
        let mut guard = tty.lock();
        let r = guard.read(&mut byte);
        guard.unlock();
        match r? {
            0 => backoff.snooze(),
            _ => return Ok(byte[0]),
        }
    }
}

/// A bounded queue of keys pressed on the keyboard.
///
/// The keyboard interrupt handler pushes keys with [`InputBuffer::push`]; a
/// full buffer drops the key.
pub struct InputBuffer {
    queue: ArrayQueue<u8>,
}

impl InputBuffer {
    /// The number of keys kept before new keys are dropped.
    pub const CAPACITY: usize = 64;

    /// Creates an empty input buffer.
    pub fn new() -> Self {
        Self {
            queue: ArrayQueue::new(Self::CAPACITY),
        }
    }

    /// Pushes a key. Returns false if the buffer was full.
    pub fn push(&self, key: u8) -> bool {
        self.queue.push(key).is_ok()
    }

    /// Pushes every key of `keys` that fits.
    pub fn push_all(&self, keys: &[u8]) -> usize {
        keys.iter().take_while(|k| self.push(**k)).count()
    }

    /// Pops the oldest key.
    pub fn pop(&self) -> Option<u8> {
        self.queue.pop()
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A serial teletype.
///
/// Output goes to the kernel serial sink (see [`crate::kprint`]), and input
/// is taken from a shared [`InputBuffer`].
pub struct Serial {
    input: Arc<InputBuffer>,
}

impl Serial {
    /// Creates a serial teletype reading from `input`.
    pub fn new(input: Arc<InputBuffer>) -> Self {
        Self { input }
    }
}

impl Teletype for Serial {
    /// Writes data to the serial sink.
    ///
    /// Bytes that are not valid UTF-8 are printed as `U+FFFD`, but still
    /// count as written.
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        print!("{}", String::from_utf8_lossy(data));
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut read = 0;
        for slot in data.iter_mut() {
            match self.input.pop() {
                Some(key) => {
                    *slot = key;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_buffer_drops_keys_when_full() {
        let input = InputBuffer::new();
        let keys = [b'k'; InputBuffer::CAPACITY + 3];
        assert_eq!(input.push_all(&keys), InputBuffer::CAPACITY);
        assert!(!input.push(b'x'));
        assert_eq!(input.pop(), Some(b'k'));
        assert!(input.push(b'x'));
    }

    #[test]
    fn getc_waits_for_a_key() {
        let input = Arc::new(InputBuffer::new());
        let tty: Arc<SpinLock<Box<dyn Teletype>>> =
            Arc::new(SpinLock::new(Box::new(Serial::new(input.clone()))));
        let reader = {
            let tty = tty.clone();
            std::thread::spawn(move || (getc(&tty), getc(&tty)))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        // Writers are not blocked while the reader waits.
        assert_eq!(write(&tty, b"").unwrap(), 0);
        input.push_all(b"hi");
        assert_eq!(reader.join().unwrap(), (Ok(b'h'), Ok(b'i')));
    }
}
