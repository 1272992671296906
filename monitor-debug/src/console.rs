//! Receive side of the debug console.
//!
//! The UART receive interrupt pushes bytes into a [`ConsoleBuffer`]; the shell
//! in the foreground and the DebugMonitor handler pull them out again.

use parking_lot::Mutex;

/// Capacity of the receive ring buffer.
pub const CONSOLE_BUFFER_SIZE: usize = 64;

/// A non-blocking source of received characters.
pub trait CharSource {
    /// The next received character, or `None` when nothing is pending.
    fn receive_next_char(&self) -> Option<char>;
}

impl<T: CharSource + ?Sized> CharSource for std::sync::Arc<T> {
    fn receive_next_char(&self) -> Option<char> {
        (**self).receive_next_char()
    }
}

#[derive(Debug)]
struct Ring {
    read_idx: usize,
    len: usize,
    buf: [u8; CONSOLE_BUFFER_SIZE],
}

/// Fixed size ring buffer between the receive interrupt and its readers.
///
/// The index and count are only ever updated together under the lock, which
/// plays the role of masking the receive interrupt on the core.
#[derive(Debug)]
pub struct ConsoleBuffer {
    ring: Mutex<Ring>,
}

impl ConsoleBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                read_idx: 0,
                len: 0,
                buf: [0; CONSOLE_BUFFER_SIZE],
            }),
        }
    }

    /// Store a received byte. Called from the receive interrupt.
    ///
    /// Returns `false` if the buffer was full and the byte was dropped.
    pub fn push_from_isr(&self, byte: u8) -> bool {
        let mut ring = self.ring.lock();

        if ring.len >= CONSOLE_BUFFER_SIZE {
            tracing::trace!("Console buffer full, dropping {:#04x}", byte);
            return false;
        }

        let write_idx = (ring.read_idx + ring.len) % CONSOLE_BUFFER_SIZE;
        ring.buf[write_idx] = byte;
        ring.len += 1;
        true
    }

    /// Number of bytes waiting to be read.
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Whether no byte is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CharSource for ConsoleBuffer {
    fn receive_next_char(&self) -> Option<char> {
        let mut ring = self.ring.lock();

        if ring.len == 0 {
            return None;
        }

        let byte = ring.buf[ring.read_idx];
        ring.read_idx = (ring.read_idx + 1) % CONSOLE_BUFFER_SIZE;
        ring.len -= 1;

        Some(char::from(byte))
    }
}
