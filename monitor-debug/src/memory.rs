//! Raw word access to the memory mapped debug registers.

/// An interface to the 32-bit address space the debug registers live in.
///
/// The debug block is part of every ARMv7-M core, so accesses never fail.
/// Reads take `&mut self` because reading some registers has side effects
/// (the sticky status bits of DHCSR clear on read).
pub trait RegisterBus {
    /// Read a 32bit word at `address`.
    ///
    /// The address has to be a multiple of 4.
    fn read_word_32(&mut self, address: u32) -> u32;

    /// Write a 32bit word to `address`.
    ///
    /// The address has to be a multiple of 4.
    fn write_word_32(&mut self, address: u32, data: u32);

    /// Read a 16bit half-word at `address`, for example a Thumb instruction.
    ///
    /// The address has to be a multiple of 2.
    fn read_word_16(&mut self, address: u32) -> u16;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read_word_32(&mut self, address: u32) -> u32 {
        (**self).read_word_32(address)
    }

    fn write_word_32(&mut self, address: u32, data: u32) {
        (**self).write_word_32(address, data)
    }

    fn read_word_16(&mut self, address: u32) -> u16 {
        (**self).read_word_16(address)
    }
}

/// Volatile access to the address space of the core this code runs on.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create a handle to the memory of the executing core.
    ///
    /// # Safety
    ///
    /// Must only be used on an ARMv7-M core, where every address passed to the
    /// bus is a valid, aligned register or code location. Only one handle
    /// should be alive, since the bus performs unsynchronised read-modify-write
    /// sequences.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBus for Mmio {
    fn read_word_32(&mut self, address: u32) -> u32 {
        // SAFETY: `Mmio::new` requires every address to be a valid register.
        unsafe { std::ptr::read_volatile(address as usize as *const u32) }
    }

    fn write_word_32(&mut self, address: u32, data: u32) {
        // SAFETY: see `read_word_32`.
        unsafe { std::ptr::write_volatile(address as usize as *mut u32, data) }
    }

    fn read_word_16(&mut self, address: u32) -> u16 {
        // SAFETY: see `read_word_32`.
        unsafe { std::ptr::read_volatile(address as usize as *const u16) }
    }
}
