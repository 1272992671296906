//! # Monitor mode debugging for ARMv7-M
//!
//! Hardware breakpoints and single stepping serviced by the core itself.
//! Instead of an external debugger halting the CPU, breakpoint and step events
//! are delivered to the DebugMonitor exception, and the firmware decides how
//! to resume.
//!
//! The crate is organised bottom-up:
//!
//! - [`memory`] and [`registers`]: typed access to the debug registers.
//! - [`fpb`]: the Flash Patch and Breakpoint comparator bank.
//! - [`monitor`]: the DebugMonitor exception state machine and the monitor
//!   mode lifecycle.
//! - [`console`] and [`shell`]: the character console the handler waits on and
//!   the command surface used to drive everything.
//! - [`sim`]: a software model of the debug block, for tests and host tools.
//!
//! ## Setting a hardware breakpoint
//!
//! ```
//! use monitor_debug::{fpb::Fpb, monitor::mode, sim::SimBus};
//!
//! let mut bus = SimBus::new(6, 2);
//!
//! mode::enable(&mut bus)?;
//!
//! let mut fpb = Fpb::new(&mut bus);
//! fpb.set_breakpoint(0, 0x0800_01a6)?;
//!
//! let entry = fpb.comparator(0)?;
//! assert!(entry.enabled);
//! assert_eq!(entry.address, 0x0800_01a6);
//! # Ok::<(), monitor_debug::Error>(())
//! ```

pub mod console;
mod error;
pub mod fpb;
pub mod memory;
pub mod monitor;
pub mod registers;
pub mod shell;
pub mod sim;
pub mod trap;


pub use crate::console::{CharSource, ConsoleBuffer};
pub use crate::error::{Error, FpbError, MonitorError};
pub use crate::fpb::{ComparatorEntry, Fpb, FpbConfig, Replace};
pub use crate::memory::{Mmio, RegisterBus};
pub use crate::monitor::{DebugMonitor, MonitorState, Resume};
pub use crate::registers::{MemoryMappedRegister, RegisterAccess};
pub use crate::trap::TrapContext;
