use crate::shell::ShellError;
use crate::sim::SimError;

/// Errors reported by the Flash Patch and Breakpoint unit.
///
/// All checks happen before any register is written, so a failed operation
/// leaves the comparator bank exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum FpbError {
    /// FPB revision {0} is not supported, only revision 0 comparators can be decoded.
    UnsupportedRevision(u8),

    /// Comparator {index} is not implemented, the unit has {available} usable comparators.
    ComparatorOutOfRange {
        /// The requested comparator.
        index: usize,
        /// Number of comparators valid for the operation.
        available: usize,
    },

    /// Address {0:#010x} is not in the code region.
    AddressOutOfCodeRegion(u32),
}

/// Errors reported when arming monitor mode debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum MonitorError {
    /// Halting debug is enabled, monitor mode debug cannot be enabled.
    HaltingDebugActive,
}

/// The overarching error type which contains all possible errors as variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error occurred while configuring the FPB.
    #[error(transparent)]
    Fpb(#[from] FpbError),
    /// An error occurred while arming monitor mode.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    /// A shell command failed.
    #[error(transparent)]
    Shell(#[from] ShellError),
    /// The simulated target faulted.
    #[error(transparent)]
    Sim(#[from] SimError),
}
