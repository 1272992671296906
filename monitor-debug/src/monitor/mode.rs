//! Arming and disarming monitor mode debugging.

use crate::error::MonitorError;
use crate::memory::RegisterBus;
use crate::registers::{Demcr, Dhcsr, RegisterAccess, Shpr3};

/// Lowest configurable exception priority. The DebugMonitor handler spins while a
/// breakpoint is held, so every other interrupt has to be able to preempt it.
const LOWEST_PRIORITY: u32 = 0xFF;

/// Whether a debugger currently controls the core through halting debug.
pub fn halting_debug_enabled(bus: &mut dyn RegisterBus) -> bool {
    bus.read_register::<Dhcsr>().c_debugen()
}

/// Whether the DebugMonitor exception is enabled.
pub fn is_enabled(bus: &mut dyn RegisterBus) -> bool {
    bus.read_register::<Demcr>().mon_en()
}

/// Enable the DebugMonitor exception at the lowest priority.
///
/// Fails without touching any register when halting debug is enabled, the two
/// debug modes are mutually exclusive.
pub fn enable(bus: &mut dyn RegisterBus) -> Result<(), MonitorError> {
    if halting_debug_enabled(bus) {
        tracing::warn!("Halting Debug Enabled - Can't Enable Monitor Mode Debug");
        return Err(MonitorError::HaltingDebugActive);
    }

    bus.modify_register(|demcr: &mut Demcr| demcr.set_mon_en(true));
    bus.modify_register(|shpr3: &mut Shpr3| shpr3.set_pri_12(LOWEST_PRIORITY));

    tracing::info!("Monitor Mode Debug Enabled!");
    Ok(())
}

/// Disable the DebugMonitor exception.
pub fn disable(bus: &mut dyn RegisterBus) {
    bus.modify_register(|demcr: &mut Demcr| demcr.set_mon_en(false));
    tracing::info!("Monitor Mode Debug Disabled");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::MemoryMappedRegister;
    use crate::test::MockMemory;
    use pretty_assertions::assert_eq;

    #[test]
    fn enable_sets_mon_en_and_lowest_priority() {
        let mut memory = MockMemory::new();
        // TRCENA, PendSV and SysTick priorities must survive.
        memory.set_word(Demcr::ADDRESS, 1 << 24);
        memory.set_word(Shpr3::ADDRESS, 0x4020_0000);

        assert_eq!(enable(&mut memory), Ok(()));

        let demcr = Demcr::from(memory.word(Demcr::ADDRESS));
        assert!(demcr.mon_en());
        assert!(demcr.trcena());
        assert!(!demcr.mon_step());
        assert_eq!(memory.word(Shpr3::ADDRESS), 0x4020_00FF);
        assert!(is_enabled(&mut memory));
    }

    #[test]
    fn enable_refused_while_halting_debug_is_active() {
        let mut memory = MockMemory::new();
        memory.set_word(Dhcsr::ADDRESS, 0x0001_0001);

        assert_eq!(enable(&mut memory), Err(MonitorError::HaltingDebugActive));

        assert!(memory.writes.is_empty());
        assert!(!is_enabled(&mut memory));
    }

    #[test]
    fn disable_clears_only_mon_en() {
        let mut memory = MockMemory::new();
        enable(&mut memory).unwrap();

        disable(&mut memory);
        disable(&mut memory);

        let demcr = Demcr::from(memory.word(Demcr::ADDRESS));
        assert!(!demcr.mon_en());
        assert_eq!(memory.word(Shpr3::ADDRESS), 0xFF);
    }
}
