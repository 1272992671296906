//! The Flash Patch and Breakpoint (FPB) unit.
//!
//! The FPB holds a bank of comparators. Code comparators (indices
//! `0..num_code_comparators`) turn an instruction fetch at their address into
//! a breakpoint, literal comparators (the indices after them) remap literal
//! loads and are only ever read here.
//!
//! [`Fpb`] keeps no state of its own. Every operation decodes FP_CTRL again,
//! so a reconfiguration by someone else is always picked up.

use crate::error::FpbError;
use crate::memory::RegisterBus;
use crate::registers::{FpComp, FpCtrl, RegisterAccess};

/// Comparator addresses must be below this, bits `[31:29]` cannot be encoded.
const CODE_REGION_END: u32 = 0x2000_0000;

/// The only FP_CTRL revision whose comparator layout is understood.
const SUPPORTED_REVISION: u8 = 0;

/// Configuration of the comparator bank, decoded from FP_CTRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpbConfig {
    /// Whether comparators currently produce breakpoints.
    pub enabled: bool,
    /// FP_CTRL.REV.
    pub revision: u8,
    /// Number of instruction address comparators.
    pub num_code_comparators: u8,
    /// Number of literal address comparators, following the code comparators.
    pub num_literal_comparators: u8,
}

impl FpbConfig {
    /// Number of comparators of both kinds.
    pub fn num_comparators(&self) -> usize {
        self.num_code_comparators as usize + self.num_literal_comparators as usize
    }
}

impl From<FpCtrl> for FpbConfig {
    fn from(ctrl: FpCtrl) -> Self {
        Self {
            enabled: ctrl.enable(),
            revision: ctrl.rev() as u8,
            num_code_comparators: ctrl.num_code() as u8,
            num_literal_comparators: ctrl.num_lit() as u8,
        }
    }
}

/// What an instruction address comparator does on a match (FP_COMPn.REPLACE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    /// Remap the access through FP_REMAP.
    Remap,
    /// Breakpoint on the lower half-word of the word.
    LowerHalf,
    /// Breakpoint on the upper half-word of the word.
    UpperHalf,
    /// Breakpoint on both half-words.
    Both,
}

impl Replace {
    /// The raw REPLACE field value.
    pub fn bits(self) -> u32 {
        match self {
            Replace::Remap => 0b00,
            Replace::LowerHalf => 0b01,
            Replace::UpperHalf => 0b10,
            Replace::Both => 0b11,
        }
    }
}

impl From<u32> for Replace {
    fn from(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Replace::Remap,
            0b01 => Replace::LowerHalf,
            0b10 => Replace::UpperHalf,
            _ => Replace::Both,
        }
    }
}

/// One comparator, as read back from FP_COMPn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparatorEntry {
    /// Whether the comparator is enabled.
    pub enabled: bool,
    /// The REPLACE field.
    pub replace: Replace,
    /// The matched address. For upper half-word breakpoints bit 1 is set again,
    /// so this is the address originally passed to [`Fpb::set_breakpoint`].
    pub address: u32,
}

impl From<FpComp> for ComparatorEntry {
    fn from(comp: FpComp) -> Self {
        Self {
            enabled: comp.enable(),
            replace: Replace::from(comp.replace()),
            address: comp.breakpoint_address(),
        }
    }
}

/// Driver for the comparator bank.
pub struct Fpb<'bus> {
    bus: &'bus mut dyn RegisterBus,
}

impl<'bus> Fpb<'bus> {
    /// Access the FPB through `bus`.
    pub fn new(bus: &'bus mut dyn RegisterBus) -> Self {
        Self { bus }
    }

    /// Decode the current configuration from FP_CTRL.
    pub fn config(&mut self) -> FpbConfig {
        FpbConfig::from(self.bus.read_register::<FpCtrl>())
    }

    /// Enable the comparator bank.
    pub fn enable(&mut self) {
        self.set_enabled(true);
    }

    /// Disable the comparator bank.
    ///
    /// The comparators keep their configuration and take effect again on [`Fpb::enable`].
    pub fn disable(&mut self) {
        self.set_enabled(false);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.bus.modify_register(|ctrl: &mut FpCtrl| {
            ctrl.set_key(true);
            ctrl.set_enable(enabled);
        });
    }

    /// Program code comparator `comp_id` to break on the instruction at `instr_addr`.
    ///
    /// Enables the bank first if it is disabled. The comparator is written without
    /// reading it back.
    pub fn set_breakpoint(&mut self, comp_id: usize, instr_addr: u32) -> Result<(), FpbError> {
        let config = self.supported_config()?;

        let available = config.num_code_comparators as usize;
        if comp_id >= available {
            tracing::warn!("Instruction Comparator {} Not Implemented", comp_id);
            return Err(FpbError::ComparatorOutOfRange {
                index: comp_id,
                available,
            });
        }

        if instr_addr >= CODE_REGION_END {
            tracing::warn!("Address {:#010x} is not in code region", instr_addr);
            return Err(FpbError::AddressOutOfCodeRegion(instr_addr));
        }

        if !config.enabled {
            tracing::info!("Enabling FPB.");
            self.enable();
        }

        let comp = FpComp::breakpoint_configuration(instr_addr);
        tracing::debug!(
            "FP_COMP[{}] <- {:#010x} (breakpoint at {:#010x})",
            comp_id,
            u32::from(comp),
            instr_addr
        );
        self.bus.write_word_32(FpComp::address(comp_id), comp.into());

        Ok(())
    }

    /// Disable code comparator `comp_id`.
    pub fn clear_breakpoint(&mut self, comp_id: usize) -> Result<(), FpbError> {
        let config = self.supported_config()?;

        let available = config.num_code_comparators as usize;
        if comp_id >= available {
            tracing::warn!("Instruction Comparator {} Not Implemented", comp_id);
            return Err(FpbError::ComparatorOutOfRange {
                index: comp_id,
                available,
            });
        }

        self.bus.write_word_32(FpComp::address(comp_id), FpComp::from(0).into());

        Ok(())
    }

    /// Read back comparator `comp_id`, code or literal.
    pub fn comparator(&mut self, comp_id: usize) -> Result<ComparatorEntry, FpbError> {
        let config = self.supported_config()?;

        let available = config.num_comparators();
        if comp_id >= available {
            tracing::warn!("Comparator {} Not Implemented", comp_id);
            return Err(FpbError::ComparatorOutOfRange {
                index: comp_id,
                available,
            });
        }

        let comp = FpComp::from(self.bus.read_word_32(FpComp::address(comp_id)));

        Ok(ComparatorEntry::from(comp))
    }

    /// Read back every implemented comparator, in index order.
    pub fn comparators(&mut self) -> Result<Vec<ComparatorEntry>, FpbError> {
        let config = self.supported_config()?;

        (0..config.num_comparators())
            .map(|comp_id| self.comparator(comp_id))
            .collect()
    }

    fn supported_config(&mut self) -> Result<FpbConfig, FpbError> {
        let config = self.config();

        if config.revision != SUPPORTED_REVISION {
            tracing::warn!("Revision {} Parsing Not Supported", config.revision);
            return Err(FpbError::UnsupportedRevision(config.revision));
        }

        Ok(config)
    }
}
