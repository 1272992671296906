//! Register types for the ARMv7-M debug and Flash Patch blocks.
//!
//! Field layouts follow the ARMv7-M Architecture Reference Manual, part C.
//! Only the fields monitor mode debugging touches are exposed.

use crate::memory::RegisterBus;
use bitfield::bitfield;

/// A memory mapped register, for instance ARM debug registers (DHCSR, etc).
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's address in the target memory.
    const ADDRESS: u32;
    /// The register's name.
    const NAME: &'static str;
}

/// Typed register access on top of any [`RegisterBus`].
pub trait RegisterAccess: RegisterBus {
    /// Read the register `R`.
    fn read_register<R: MemoryMappedRegister>(&mut self) -> R {
        let value = self.read_word_32(R::ADDRESS);
        tracing::trace!("{} -> {:#010x}", R::NAME, value);
        R::from(value)
    }

    /// Write `register` to its address.
    fn write_register<R: MemoryMappedRegister>(&mut self, register: R) {
        let value: u32 = register.into();
        tracing::trace!("{} <- {:#010x}", R::NAME, value);
        self.write_word_32(R::ADDRESS, value);
    }

    /// Read the register, let `f` change it, and write it back in one sequence.
    ///
    /// Returns the value that was written.
    fn modify_register<R, F>(&mut self, f: F) -> R
    where
        R: MemoryMappedRegister,
        F: FnOnce(&mut R),
    {
        let mut register = self.read_register::<R>();
        f(&mut register);
        self.write_register(register.clone());
        register
    }
}

impl<T: RegisterBus + ?Sized> RegisterAccess for T {}

/// Implements the `u32` conversions every register type needs.
macro_rules! register_conversions {
    ($name:ident) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

bitfield! {
    /// Debug Halting Control and Status Register, DHCSR (see armv7-M Architecture Reference Manual C1.6.2)
    ///
    /// Software on the core only reads this register. `C_DEBUGEN` tells us whether a debugger
    /// owns the core through halting debug.
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// Indicates whether the processor is locked up because of an unrecoverable exception.
    pub s_lockup, _: 19;
    /// Indicates whether the processor is in Debug state.
    pub s_halt, _: 17;
    /// Processor step bit, used by halting debug only.
    pub c_step, _: 2;
    /// Processor halt bit.
    pub c_halt, _: 1;
    ///  Halting debug enable bit:
    ///
    /// `0`: Halting debug disabled.\
    /// `1`: Halting debug enabled.
    ///
    /// This bit can only be written from the DAP, writes from software running on the
    /// processor are ignored. Halting debug and monitor debug are mutually exclusive.
    pub c_debugen, _: 0;
}

register_conversions!(Dhcsr);

impl MemoryMappedRegister for Dhcsr {
    const ADDRESS: u32 = 0xE000_EDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// Debug Exception and Monitor Control Register, DEMCR (see armv7-M Architecture Reference Manual C1.6.5)
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for DWT and ITM features
    pub trcena, set_trcena: 24;
    /// DebugMonitor semaphore bit, free for use by the monitor
    pub mon_req, set_mon_req: 19;
    /// When `MON_EN` is set, step the processor: the DebugMonitor exception
    /// is raised with `DFSR.HALTED` after the next instruction retires.
    pub mon_step, set_mon_step: 18;
    /// Sets or clears the pending state of the DebugMonitor exception
    pub mon_pend, set_mon_pend: 17;
    /// Enable the DebugMonitor exception
    pub mon_en, set_mon_en: 16;
}

register_conversions!(Demcr);

impl MemoryMappedRegister for Demcr {
    const ADDRESS: u32 = 0xE000_EDFC;
    const NAME: &'static str = "DEMCR";
}

bitfield! {
    /// Debug Fault Status Register, DFSR (see armv7-M Architecture Reference Manual C1.6.1)
    ///
    /// All bits are sticky and cleared by writing `1` to them.
    #[derive(Copy, Clone)]
    pub struct Dfsr(u32);
    impl Debug;
    /// Assertion of the external debug request signal.
    pub external, set_external: 4;
    /// Vector catch triggered.
    pub vcatch, set_vcatch: 3;
    /// DWT watchpoint or trace event.
    pub dwttrap, set_dwttrap: 2;
    /// Breakpoint: a `BKPT` instruction was executed or an FPB comparator matched.
    pub bkpt, set_bkpt: 1;
    /// Halt request or single step completion.
    pub halted, set_halted: 0;
}

impl Dfsr {
    /// Value which acknowledges every event when written.
    pub fn clear_all() -> Self {
        Dfsr(0b11111)
    }

    /// Value which acknowledges only the breakpoint event when written.
    pub fn breakpoint_event() -> Self {
        let mut dfsr = Dfsr(0);
        dfsr.set_bkpt(true);
        dfsr
    }

    /// Value which acknowledges only the halt event when written.
    pub fn halt_event() -> Self {
        let mut dfsr = Dfsr(0);
        dfsr.set_halted(true);
        dfsr
    }
}

impl From<u32> for Dfsr {
    fn from(val: u32) -> Self {
        // Bits above EXTERNAL are reserved.
        Dfsr(val & 0b11111)
    }
}

impl From<Dfsr> for u32 {
    fn from(register: Dfsr) -> Self {
        register.0
    }
}

impl MemoryMappedRegister for Dfsr {
    const ADDRESS: u32 = 0xE000_ED30;
    const NAME: &'static str = "DFSR";
}

bitfield! {
    /// System Handler Priority Register 3, SHPR3 (see armv7-M Architecture Reference Manual B3.2.12)
    #[derive(Copy, Clone)]
    pub struct Shpr3(u32);
    impl Debug;
    /// Priority of the SysTick exception.
    pub pri_15, set_pri_15: 31, 24;
    /// Priority of the PendSV exception.
    pub pri_14, set_pri_14: 23, 16;
    /// Priority of the DebugMonitor exception. Higher values mean lower priority.
    pub pri_12, set_pri_12: 7, 0;
}

register_conversions!(Shpr3);

impl MemoryMappedRegister for Shpr3 {
    const ADDRESS: u32 = 0xE000_ED20;
    const NAME: &'static str = "SHPR3";
}

bitfield! {
    /// Flash Patch Control Register, FP_CTRL (see armv7-M Architecture Reference Manual C1.11.3)
    #[derive(Copy,Clone)]
    pub struct FpCtrl(u32);
    impl Debug;
    /// Flash Patch breakpoint architecture revision:
    ///
    /// `0b0000` Flash Patch breakpoint version 1.\
    /// `0b0001` Flash Patch breakpoint version 2. Supports breakpoints on any location in the 4GB address range.
    pub rev, _: 31, 28;
    num_code_1, _: 14, 12;
    /// The number of literal address comparators supported, starting from NUM_CODE upwards.
    ///
    /// If this field is zero, the implementation does not support literal comparators.
    pub num_lit, _: 11, 8;
    num_code_0, _: 7, 4;
    /// On any write to FP_CTRL, this bit must be `1`. A write to the register with this bit set to zero
    /// is ignored. The Flash Patch Breakpoint unit ignores the write unless this bit is `1`.
    pub key, set_key: 1;
    /// Enable bit for the FPB:
    ///
    /// `0`: Flash Patch breakpoint disabled.\
    /// `1`: Flash Patch breakpoint enabled.
    ///
    /// A power-on reset clears this bit to `0`.
    pub enable, set_enable: 0;
}

impl FpCtrl {
    /// The number of instruction address comparators.
    ///
    /// NUM_CODE is split across two fields, bits `[14:12]` hold the upper three bits.
    pub fn num_code(&self) -> u32 {
        (self.num_code_1() << 4) | self.num_code_0()
    }
}

register_conversions!(FpCtrl);

impl MemoryMappedRegister for FpCtrl {
    const ADDRESS: u32 = 0xE000_2000;
    const NAME: &'static str = "FP_CTRL";
}

bitfield! {
    /// Flash Patch Remap register, FP_REMAP (see armv7-M Architecture Reference Manual C1.11.4)
    #[derive(Copy,Clone)]
    pub struct FpRemap(u32);
    impl Debug;
    /// Whether the unit supports remapping to SRAM.
    pub rmpspt, _: 29;
    /// Bits `[28:5]` of the SRAM remap table base address.
    pub remap, set_remap: 28, 5;
}

register_conversions!(FpRemap);

impl MemoryMappedRegister for FpRemap {
    const ADDRESS: u32 = 0xE000_2004;
    const NAME: &'static str = "FP_REMAP";
}

bitfield! {
    /// Flash Patch Comparator register, FP_COMPn, for FPB revision 1 (FP_CTRL.REV = `0`)
    /// (see armv7-M Architecture Reference Manual C1.11.5)
    #[derive(Copy,Clone)]
    pub struct FpComp(u32);
    impl Debug;
    /// For an instruction address comparator:
    ///
    /// `00`: Remap to remap address, see FP_REMAP.\
    /// `01`: Breakpoint on instruction at `'000':COMP:'00'`.\
    /// `10`: Breakpoint on instruction at `'000':COMP:'10'`.\
    /// `11`: Breakpoint on both instructions at `'000':COMP:'00'` and `'000':COMP:'10'`.
    ///
    /// For a literal address comparator this field is UNK/SBZP.
    pub replace, set_replace: 31, 30;
    /// Bits `[28:2]` of the address to compare with addresses from the Code memory region.
    /// Bits `[31:29]` of the address for comparison are zero.
    pub comp, set_comp: 28, 2;
    /// Enable bit for this comparator.
    ///
    /// A power-on reset clears this bit to `0`.
    pub enable, set_enable: 0;
}

impl FpComp {
    /// Address of the first comparator, FP_COMP0.
    pub const BASE_ADDRESS: u32 = 0xE000_2008;

    /// Maximum number of comparators the register block has room for
    /// (127 code and 15 literal comparators).
    pub const MAX_COMPARATORS: usize = 142;

    /// Address of comparator `index`.
    pub fn address(index: usize) -> u32 {
        Self::BASE_ADDRESS + (index * std::mem::size_of::<u32>()) as u32
    }

    /// The register value which breakpoints the half-word at `address`.
    ///
    /// The caller must have checked that `address` lies in the code region, since
    /// bits `[31:29]` cannot be encoded.
    pub fn breakpoint_configuration(address: u32) -> Self {
        debug_assert!(address < 0x2000_0000);

        // Bit 1 of the address selects which half-word of the aligned word is matched.
        let replace = if address & 0x2 == 0 {
            0b01 // lower half word
        } else {
            0b10 // upper half word
        };

        let mut reg = FpComp(0);
        reg.set_comp(address >> 2);
        reg.set_replace(replace);
        reg.set_enable(true);
        reg
    }

    /// The instruction address this comparator matches, reinserting bit 1 for
    /// upper half-word breakpoints.
    pub fn breakpoint_address(&self) -> u32 {
        let address = self.comp() << 2;
        if self.replace() == 0b10 {
            address | 0x2
        } else {
            address
        }
    }
}

register_conversions!(FpComp);
