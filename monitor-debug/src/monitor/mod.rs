//! The DebugMonitor exception handler.
//!
//! With monitor mode armed (see [`mode`]), every breakpoint and every completed
//! single step enters the DebugMonitor exception. [`DebugMonitor::handle_exception`]
//! decides what happened and how the interrupted code resumes:
//!
//! - A `BKPT` instruction is skipped by advancing the return address.
//! - An FPB breakpoint cannot be skipped that way, the instruction under it still
//!   has to run. The handler disables the FPB and arms a single step instead. When
//!   the step has retired the next exception re-enables the FPB.
//!
//! Breakpoints are held until the console delivers `c`.

pub mod mode;

use crate::console::CharSource;
use crate::fpb::Fpb;
use crate::memory::RegisterBus;
use crate::registers::{Demcr, Dfsr, RegisterAccess};
use crate::trap::TrapContext;

/// Character which resumes execution from a breakpoint.
pub const CONTINUE_CHAR: char = 'c';

/// Size of a Thumb `BKPT` instruction.
const BKPT_INSTRUCTION_SIZE: u32 = 2;

/// Whether `instruction` is a Thumb `BKPT #imm8`.
pub fn is_breakpoint_instruction(instruction: u16) -> bool {
    instruction & 0xFF00 == 0xBE00
}

/// Where the monitor is in servicing debug events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    /// Normal execution.
    #[default]
    Idle,
    /// A breakpoint was hit and the handler is waiting for the continue command.
    BreakpointHit,
    /// The FPB is disabled and one instruction is being stepped.
    SingleStepping,
}

/// How execution resumes after one pass through the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// A `BKPT` instruction was skipped, execution resumes at `to`.
    SoftwareBreakpoint { from: u32, to: u32 },
    /// The FPB is disabled and a single step of the instruction at `at` is armed.
    SingleStep { at: u32 },
    /// A single step retired, the FPB is enabled again.
    StepComplete { at: u32 },
    /// Neither a breakpoint nor a halt event was pending.
    Spurious,
}

/// The debug event flags of DFSR, classified on exception entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DebugEvents {
    breakpoint: bool,
    halt: bool,
}

impl From<Dfsr> for DebugEvents {
    fn from(dfsr: Dfsr) -> Self {
        Self {
            breakpoint: dfsr.bkpt(),
            halt: dfsr.halted(),
        }
    }
}

/// State of the DebugMonitor handler, kept across exceptions.
#[derive(Debug, Default)]
pub struct DebugMonitor {
    state: MonitorState,
    /// Return address of the last frame that was dumped.
    last_reported_pc: Option<u32>,
}

impl DebugMonitor {
    /// A monitor in [`MonitorState::Idle`] that has not reported any trap yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current handler state.
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Return address of the last trap whose registers were dumped.
    pub fn last_reported_pc(&self) -> Option<u32> {
        self.last_reported_pc
    }

    /// Service one DebugMonitor exception.
    ///
    /// `frame` is the stacked context of the interrupted code. On a breakpoint the
    /// handler blocks, polling `console` until [`CONTINUE_CHAR`] arrives.
    pub fn handle_exception(
        &mut self,
        bus: &mut dyn RegisterBus,
        console: &dyn CharSource,
        frame: &mut TrapContext,
    ) -> Resume {
        let dfsr = bus.read_register::<Dfsr>();
        let events = DebugEvents::from(dfsr);

        if !events.breakpoint && !events.halt {
            tracing::debug!("DebugMonitor entered without a breakpoint or halt event");
            return Resume::Spurious;
        }

        if self.last_reported_pc != Some(frame.return_address) {
            self.report(bus, dfsr, frame);
        }

        // A step can retire onto a BKPT instruction, in which case both events are
        // pending. The step is finished first so the FPB state is consistent again.
        let mut resume = Resume::Spurious;

        if events.halt {
            resume = self.complete_step(bus, frame);
        }

        if events.breakpoint {
            resume = self.service_breakpoint(bus, console, frame);
        }

        resume
    }

    fn report(&mut self, bus: &mut dyn RegisterBus, dfsr: Dfsr, frame: &TrapContext) {
        let demcr = bus.read_register::<Demcr>();

        tracing::info!("DebugMonitor Exception");
        tracing::info!("DEMCR: {:#010x}", u32::from(demcr));
        tracing::info!(
            "DFSR:  {:#010x} (bkpt={}, halt={})",
            u32::from(dfsr),
            dfsr.bkpt() as u8,
            dfsr.halted() as u8
        );

        tracing::info!("Register Dump");
        for (name, value) in frame.registers() {
            tracing::info!(" {:<4}={:#010x}", name, value);
        }

        self.last_reported_pc = Some(frame.return_address);

        if dfsr.bkpt() {
            tracing::info!("Breakpoint Detected, Awaiting '{}'", CONTINUE_CHAR);
        }
    }

    fn service_breakpoint(
        &mut self,
        bus: &mut dyn RegisterBus,
        console: &dyn CharSource,
        frame: &mut TrapContext,
    ) -> Resume {
        self.state = MonitorState::BreakpointHit;

        wait_for_continue(console);

        let at = frame.return_address;
        let instruction = bus.read_word_16(at);

        let resume = if is_breakpoint_instruction(instruction) {
            frame.return_address = at.wrapping_add(BKPT_INSTRUCTION_SIZE);
            self.state = MonitorState::Idle;

            Resume::SoftwareBreakpoint {
                from: at,
                to: frame.return_address,
            }
        } else {
            // The comparator would match again on return, so the whole bank is
            // disabled until the instruction has been stepped.
            Fpb::new(bus).disable();
            tracing::info!("Single-Stepping over FPB at {:#x}", at);
            bus.modify_register(|demcr: &mut Demcr| demcr.set_mon_step(true));
            self.state = MonitorState::SingleStepping;

            Resume::SingleStep { at }
        };

        bus.write_register(Dfsr::breakpoint_event());

        resume
    }

    fn complete_step(&mut self, bus: &mut dyn RegisterBus, frame: &TrapContext) -> Resume {
        if self.state != MonitorState::SingleStepping {
            tracing::debug!("Halt event in state {:?}", self.state);
        }

        tracing::info!("Disabling Single Step and Re-enabling FPB");
        bus.modify_register(|demcr: &mut Demcr| demcr.set_mon_step(false));
        Fpb::new(bus).enable();
        self.state = MonitorState::Idle;

        bus.write_register(Dfsr::halt_event());

        Resume::StepComplete {
            at: frame.return_address,
        }
    }
}

/// Spin on the console until the continue command arrives.
fn wait_for_continue(console: &dyn CharSource) {
    loop {
        match console.receive_next_char() {
            Some(CONTINUE_CHAR) => {
                tracing::info!("Got char '{}'!", CONTINUE_CHAR);
                return;
            }
            Some(c) => tracing::info!("Got char '{}'!", c.escape_default()),
            None => std::thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::{FpComp, FpCtrl, MemoryMappedRegister};
    use crate::test::{MockMemory, ScriptedConsole};
    use pretty_assertions::assert_eq;

    const SW_BKPT_ADDR: u32 = 0x0800_0100;
    const HW_BKPT_ADDR: u32 = 0x0800_0202;

    fn memory_with_program() -> MockMemory {
        let mut memory = MockMemory::with_fpb(0, 6, 2);
        memory.add_instruction(SW_BKPT_ADDR, 0xBE01);
        memory.add_instruction(HW_BKPT_ADDR, 0x2001); // movs r0, #1
        memory.add_instruction(HW_BKPT_ADDR + 2, 0x4770); // bx lr

        let mut demcr = Demcr::from(0);
        demcr.set_mon_en(true);
        memory.set_word(Demcr::ADDRESS, demcr.into());

        memory
    }

    fn raise(memory: &mut MockMemory, dfsr: Dfsr) {
        let raised = memory.word(Dfsr::ADDRESS) | u32::from(dfsr);
        memory.set_word(Dfsr::ADDRESS, raised);
    }

    #[test]
    fn breakpoint_instruction_encodings() {
        assert!(is_breakpoint_instruction(0xBE00));
        assert!(is_breakpoint_instruction(0xBEAB));
        assert!(!is_breakpoint_instruction(0xBF00));
        assert!(!is_breakpoint_instruction(0x4770));
    }

    #[test]
    fn software_breakpoint_is_skipped() {
        let mut memory = memory_with_program();
        raise(&mut memory, Dfsr::breakpoint_event());
        let fpb_before = memory.word(FpCtrl::ADDRESS);

        let console = ScriptedConsole::new("xc");
        let mut monitor = DebugMonitor::new();
        let mut frame = TrapContext::at(SW_BKPT_ADDR);

        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(
            resume,
            Resume::SoftwareBreakpoint {
                from: SW_BKPT_ADDR,
                to: SW_BKPT_ADDR + 2
            }
        );
        assert_eq!(frame.return_address, SW_BKPT_ADDR + 2);
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(console.remaining(), 0);

        // The FPB is not involved and the event is acknowledged.
        assert_eq!(memory.word(FpCtrl::ADDRESS), fpb_before);
        assert!(!Demcr::from(memory.word(Demcr::ADDRESS)).mon_step());
        assert_eq!(
            memory.writes.last(),
            Some(&(Dfsr::ADDRESS, u32::from(Dfsr::breakpoint_event())))
        );
    }

    #[test]
    fn characters_after_continue_stay_in_the_console() {
        let mut memory = memory_with_program();
        raise(&mut memory, Dfsr::breakpoint_event());

        let console = ScriptedConsole::new("abcfpb_dump");
        let mut frame = TrapContext::at(SW_BKPT_ADDR);

        DebugMonitor::new().handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(console.remaining(), "fpb_dump".len());
    }

    #[test]
    fn hardware_breakpoint_is_stepped() {
        let mut memory = memory_with_program();
        Fpb::new(&mut memory).set_breakpoint(0, HW_BKPT_ADDR).unwrap();
        let comparator = memory.word(FpComp::address(0));

        let console = ScriptedConsole::new("c");
        let mut monitor = DebugMonitor::new();

        // The comparator matched.
        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(HW_BKPT_ADDR);
        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(resume, Resume::SingleStep { at: HW_BKPT_ADDR });
        assert_eq!(frame.return_address, HW_BKPT_ADDR);
        assert_eq!(monitor.state(), MonitorState::SingleStepping);
        assert!(!FpCtrl::from(memory.word(FpCtrl::ADDRESS)).enable());
        assert!(Demcr::from(memory.word(Demcr::ADDRESS)).mon_step());

        // The acknowledgement is the last write, after the transition.
        let writes: Vec<u32> = memory.writes.iter().map(|w| w.0).collect();
        assert_eq!(
            &writes[writes.len() - 3..],
            &[FpCtrl::ADDRESS, Demcr::ADDRESS, Dfsr::ADDRESS]
        );

        // The instruction under the breakpoint retired.
        memory.set_word(Dfsr::ADDRESS, 0);
        raise(&mut memory, Dfsr::halt_event());
        let mut frame = TrapContext::at(HW_BKPT_ADDR + 2);
        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(
            resume,
            Resume::StepComplete {
                at: HW_BKPT_ADDR + 2
            }
        );
        assert_eq!(frame.return_address, HW_BKPT_ADDR + 2);
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert!(FpCtrl::from(memory.word(FpCtrl::ADDRESS)).enable());
        assert!(!Demcr::from(memory.word(Demcr::ADDRESS)).mon_step());
        assert!(Demcr::from(memory.word(Demcr::ADDRESS)).mon_en());
        assert_eq!(memory.word(FpComp::address(0)), comparator);
        assert_eq!(
            memory.writes.last(),
            Some(&(Dfsr::ADDRESS, u32::from(Dfsr::halt_event())))
        );
    }

    #[test]
    fn spurious_exception_changes_nothing() {
        let mut memory = memory_with_program();
        let console = ScriptedConsole::new("c");
        let mut monitor = DebugMonitor::new();
        let mut frame = TrapContext::at(HW_BKPT_ADDR);

        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(resume, Resume::Spurious);
        assert_eq!(frame, TrapContext::at(HW_BKPT_ADDR));
        assert!(memory.writes.is_empty());
        assert_eq!(console.remaining(), 1);
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(monitor.last_reported_pc(), None);
    }

    #[test]
    fn repeated_trap_address_is_reported_once() {
        let mut memory = memory_with_program();
        let console = ScriptedConsole::new("cc");
        let mut monitor = DebugMonitor::new();

        assert_eq!(monitor.last_reported_pc(), None);

        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(SW_BKPT_ADDR);
        monitor.handle_exception(&mut memory, &console, &mut frame);
        assert_eq!(monitor.last_reported_pc(), Some(SW_BKPT_ADDR));

        // A second entry at a different address is reported again.
        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(HW_BKPT_ADDR);
        monitor.handle_exception(&mut memory, &console, &mut frame);
        assert_eq!(monitor.last_reported_pc(), Some(HW_BKPT_ADDR));
    }

    #[test]
    fn reentry_at_same_address_skips_the_dump() {
        let mut memory = memory_with_program();
        let console = ScriptedConsole::new("cc");
        let mut monitor = DebugMonitor::new();

        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(SW_BKPT_ADDR);
        monitor.handle_exception(&mut memory, &console, &mut frame);

        // The dump reads DEMCR.
        assert_eq!(memory.reads, vec![Dfsr::ADDRESS, Demcr::ADDRESS]);

        memory.reads.clear();
        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(SW_BKPT_ADDR);
        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(memory.reads, vec![Dfsr::ADDRESS]);
        assert_eq!(monitor.last_reported_pc(), Some(SW_BKPT_ADDR));
        assert_eq!(
            resume,
            Resume::SoftwareBreakpoint {
                from: SW_BKPT_ADDR,
                to: SW_BKPT_ADDR + 2
            }
        );
    }

    #[test]
    fn step_onto_breakpoint_instruction_services_both_events() {
        let mut memory = memory_with_program();
        let console = ScriptedConsole::new("c");
        let mut monitor = DebugMonitor::new();

        let mut demcr = Demcr::from(memory.word(Demcr::ADDRESS));
        demcr.set_mon_step(true);
        memory.set_word(Demcr::ADDRESS, demcr.into());

        raise(&mut memory, Dfsr::halt_event());
        raise(&mut memory, Dfsr::breakpoint_event());
        let mut frame = TrapContext::at(SW_BKPT_ADDR);
        let resume = monitor.handle_exception(&mut memory, &console, &mut frame);

        assert_eq!(
            resume,
            Resume::SoftwareBreakpoint {
                from: SW_BKPT_ADDR,
                to: SW_BKPT_ADDR + 2
            }
        );
        assert!(!Demcr::from(memory.word(Demcr::ADDRESS)).mon_step());
        assert!(FpCtrl::from(memory.word(FpCtrl::ADDRESS)).enable());
        assert_eq!(monitor.state(), MonitorState::Idle);
    }
}
