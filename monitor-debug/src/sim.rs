//! A software model of an ARMv7-M core's debug block.
//!
//! [`SimBus`] models the registers the monitor uses, with the access rules of
//! the real hardware. [`Machine`] runs a stream of Thumb half-words on top of it
//! and raises the DebugMonitor exception the way the core would, so the whole
//! breakpoint and step flow can be exercised without a device.
//!
//! Apart from `BKPT` and `BX LR` every instruction is treated as a 16-bit
//! no-op. Only control flow matters to the debug block.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::console::ConsoleBuffer;
use crate::memory::RegisterBus;
use crate::monitor::{is_breakpoint_instruction, DebugMonitor, Resume};
use crate::registers::{
    Demcr, Dfsr, Dhcsr, FpComp, FpCtrl, FpRemap, MemoryMappedRegister, RegisterAccess, Shpr3,
};
use crate::shell::{ShellError, Target};
use crate::trap::TrapContext;

/// Thumb encoding of `BX LR`, which ends a called function.
pub const BX_LR: u16 = 0x4770;

/// Link register value of a call from [`Machine::call`]. Returning there ends the call.
pub const RETURN_TO_HOST: u32 = 0xFFFF_FFFE;

/// Where the routine run by the shell's `bkpt` command lives.
pub const BKPT_COMMAND_ADDRESS: u32 = 0x0000_0200;

/// Default number of fetches after which [`Machine::call`] gives up.
pub const DEFAULT_INSTRUCTION_LIMIT: usize = 10_000;

/// Writes to DHCSR only take effect with this key in the upper half-word.
const DBGKEY: u32 = 0xA05F;

/// Value read from code memory that was never loaded, like erased flash.
const ERASED: u16 = 0xFFFF;

/// Errors of the simulated core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum SimError {
    /// HardFault: breakpoint at {0:#010x} with the DebugMonitor exception disabled.
    HardFault(u32),

    /// The core was halted by the attached debugger at {0:#010x}.
    Halted(u32),

    /// No instruction loaded at {0:#010x}.
    NoInstruction(u32),

    /// The call did not return within {0} instructions.
    InstructionLimit(usize),
}

/// Debug registers and code memory of the simulated core.
#[derive(Debug, Clone)]
pub struct SimBus {
    dhcsr: u32,
    demcr: u32,
    dfsr: u32,
    shpr3: u32,
    fpb_enabled: bool,
    revision: u8,
    num_code: u8,
    num_literal: u8,
    fp_remap: u32,
    comparators: Vec<u32>,
    code: BTreeMap<u32, u16>,
    data: BTreeMap<u32, u32>,
}

impl SimBus {
    /// A core with a revision 0 FPB with the given number of comparators, after reset.
    pub fn new(num_code: u8, num_literal: u8) -> Self {
        // NUM_CODE is 7 bits wide, NUM_LIT 4 bits.
        let num_code = num_code.min(0x7F);
        let num_literal = num_literal.min(0xF);

        Self {
            dhcsr: 0,
            demcr: 0,
            dfsr: 0,
            shpr3: 0,
            fpb_enabled: false,
            revision: 0,
            num_code,
            num_literal,
            fp_remap: 0,
            comparators: vec![0; num_code as usize + num_literal as usize],
            code: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// Report a different FP_CTRL.REV.
    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = revision & 0xF;
        self
    }

    /// Attach or detach a debugger using halting debug, by setting DHCSR.C_DEBUGEN.
    pub fn set_halting_debug(&mut self, enabled: bool) {
        if enabled {
            self.dhcsr |= 1;
        } else {
            self.dhcsr &= !1;
        }
    }

    /// Place Thumb half-words in code memory, starting at `address`.
    pub fn load(&mut self, address: u32, instructions: &[u16]) {
        for (offset, instruction) in instructions.iter().enumerate() {
            let offset = (offset as u32).wrapping_mul(2);
            self.code.insert(address.wrapping_add(offset), *instruction);
        }
    }

    /// The half-word at `address`, if one was loaded.
    pub fn instruction(&self, address: u32) -> Option<u16> {
        self.code.get(&address).copied()
    }

    /// The code comparator that turns a fetch from `address` into a breakpoint.
    pub fn fpb_match(&self, address: u32) -> Option<usize> {
        if !self.fpb_enabled || self.revision != 0 {
            return None;
        }

        self.comparators[..self.num_code as usize]
            .iter()
            .position(|&value| {
                let comp = FpComp::from(value);
                if !comp.enable() || comp.comp() << 2 != address & 0xFFFF_FFFC {
                    return false;
                }

                // REPLACE selects which half-word of the matched word breaks.
                match comp.replace() {
                    0b01 => address & 0x2 == 0,
                    0b10 => address & 0x2 != 0,
                    0b11 => true,
                    _ => false,
                }
            })
    }

    fn fp_ctrl(&self) -> u32 {
        (self.revision as u32) << 28
            | ((self.num_code as u32 >> 4) & 0x7) << 12
            | (self.num_literal as u32) << 8
            | (self.num_code as u32 & 0xF) << 4
            | self.fpb_enabled as u32
    }

    fn comparator_index(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(FpComp::BASE_ADDRESS)?;
        let index = (offset / 4) as usize;
        (offset % 4 == 0 && index < self.comparators.len()).then_some(index)
    }

    fn raise(&mut self, events: Dfsr) {
        self.dfsr |= u32::from(events);
    }
}

impl RegisterBus for SimBus {
    fn read_word_32(&mut self, address: u32) -> u32 {
        if let Some(index) = self.comparator_index(address) {
            return self.comparators[index];
        }

        match address {
            Dhcsr::ADDRESS => self.dhcsr,
            Demcr::ADDRESS => self.demcr,
            Dfsr::ADDRESS => self.dfsr,
            Shpr3::ADDRESS => self.shpr3,
            FpCtrl::ADDRESS => self.fp_ctrl(),
            FpRemap::ADDRESS => self.fp_remap,
            _ => match self.data.get(&address) {
                Some(value) => *value,
                None => {
                    let low = self.read_word_16(address) as u32;
                    let high = self.read_word_16(address.wrapping_add(2)) as u32;
                    high << 16 | low
                }
            },
        }
    }

    fn write_word_32(&mut self, address: u32, data: u32) {
        if let Some(index) = self.comparator_index(address) {
            self.comparators[index] = data;
            return;
        }

        match address {
            Dhcsr::ADDRESS => {
                if data >> 16 == DBGKEY {
                    self.dhcsr = (self.dhcsr & 0xFFFF_0000) | (data & 0xFFFF);
                } else {
                    tracing::trace!("Ignoring DHCSR write without DBGKEY");
                }
            }
            Demcr::ADDRESS => self.demcr = data,
            // Write one to clear.
            Dfsr::ADDRESS => self.dfsr &= !u32::from(Dfsr::from(data)),
            Shpr3::ADDRESS => self.shpr3 = data,
            FpCtrl::ADDRESS => {
                let ctrl = FpCtrl::from(data);
                if ctrl.key() {
                    self.fpb_enabled = ctrl.enable();
                } else {
                    tracing::trace!("Ignoring FP_CTRL write without KEY");
                }
            }
            FpRemap::ADDRESS => self.fp_remap = data,
            _ => {
                self.data.insert(address, data);
            }
        }
    }

    fn read_word_16(&mut self, address: u32) -> u16 {
        self.instruction(address).unwrap_or(ERASED)
    }
}

/// What one [`Machine::call`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSummary {
    /// Instructions retired, not counting breakpoint instructions.
    pub executed: usize,
    /// Every pass through the DebugMonitor handler, in order.
    pub traps: Vec<Resume>,
}

/// A simulated core running the DebugMonitor handler.
pub struct Machine {
    bus: SimBus,
    monitor: DebugMonitor,
    console: Arc<ConsoleBuffer>,
    instruction_limit: usize,
}

impl Machine {
    /// Run code on `bus`. The DebugMonitor handler waits for input on `console`.
    pub fn new(mut bus: SimBus, console: Arc<ConsoleBuffer>) -> Self {
        bus.load(BKPT_COMMAND_ADDRESS, &[0xBE01, BX_LR]);

        Self {
            bus,
            monitor: DebugMonitor::new(),
            console,
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
        }
    }

    /// Give up on calls after `limit` fetches.
    pub fn with_instruction_limit(mut self, limit: usize) -> Self {
        self.instruction_limit = limit;
        self
    }

    /// The debug registers and code memory, for setup and inspection.
    pub fn bus_mut(&mut self) -> &mut SimBus {
        &mut self.bus
    }

    /// State of the DebugMonitor handler.
    pub fn monitor(&self) -> &DebugMonitor {
        &self.monitor
    }

    /// The console the handler waits on for the continue command.
    pub fn console(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    /// Call the function at `address` and run until it returns with `BX LR`.
    pub fn call(&mut self, address: u32) -> Result<CallSummary, SimError> {
        tracing::debug!("Calling {:#010x}", address);

        let mut summary = CallSummary::default();
        let mut pc = address;

        for _ in 0..self.instruction_limit {
            let demcr = self.bus.read_register::<Demcr>();

            if demcr.mon_en() && self.bus.fpb_match(pc).is_some() {
                pc = self.debug_event(pc, Dfsr::breakpoint_event(), &mut summary)?;
                continue;
            }

            let instruction = self
                .bus
                .instruction(pc)
                .ok_or(SimError::NoInstruction(pc))?;

            if is_breakpoint_instruction(instruction) {
                if !demcr.mon_en() && !self.halting_debug() {
                    tracing::warn!("BKPT at {:#010x} without a debug monitor", pc);
                    return Err(SimError::HardFault(pc));
                }

                pc = self.debug_event(pc, Dfsr::breakpoint_event(), &mut summary)?;
                continue;
            }

            summary.executed += 1;
            let next = if instruction == BX_LR {
                RETURN_TO_HOST
            } else {
                pc.wrapping_add(2)
            };

            pc = if demcr.mon_en() && demcr.mon_step() {
                self.debug_event(next, Dfsr::halt_event(), &mut summary)?
            } else {
                next
            };

            if pc == RETURN_TO_HOST {
                return Ok(summary);
            }
        }

        Err(SimError::InstructionLimit(self.instruction_limit))
    }

    fn halting_debug(&mut self) -> bool {
        self.bus.read_register::<Dhcsr>().c_debugen()
    }

    /// Take a debug event at `pc` and return where execution continues.
    fn debug_event(
        &mut self,
        pc: u32,
        event: Dfsr,
        summary: &mut CallSummary,
    ) -> Result<u32, SimError> {
        self.bus.raise(event);

        if self.halting_debug() {
            return Err(SimError::Halted(pc));
        }

        let mut frame = TrapContext::at(pc);
        frame.lr = RETURN_TO_HOST;

        let resume = self
            .monitor
            .handle_exception(&mut self.bus, &*self.console, &mut frame);
        tracing::debug!("DebugMonitor returned {:?}", resume);
        summary.traps.push(resume);

        Ok(frame.return_address)
    }
}

impl Target for Machine {
    fn bus(&mut self) -> &mut dyn RegisterBus {
        &mut self.bus
    }

    fn issue_breakpoint(&mut self) -> Result<(), ShellError> {
        self.call(BKPT_COMMAND_ADDRESS)
            .map(|_| ())
            .map_err(ShellError::target)
    }
}
