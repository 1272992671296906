//! The register frame stacked by the core on exception entry.

/// Registers pushed onto the active stack when the DebugMonitor exception is taken.
///
/// The layout matches the hardware stacking order, so on the core the handler can
/// take a `&mut TrapContext` straight from the stack pointer. Changing
/// `return_address` changes where execution resumes after the exception returns.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapContext {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub return_address: u32,
    pub xpsr: u32,
}

impl TrapContext {
    /// A frame for an exception taken at `return_address` in Thumb state.
    pub fn at(return_address: u32) -> Self {
        Self {
            return_address,
            xpsr: 1 << 24,
            ..Default::default()
        }
    }

    /// Name and value of every stacked register, in stacking order.
    pub fn registers(&self) -> [(&'static str, u32); 8] {
        [
            ("r0", self.r0),
            ("r1", self.r1),
            ("r2", self.r2),
            ("r3", self.r3),
            ("r12", self.r12),
            ("lr", self.lr),
            ("pc", self.return_address),
            ("xpsr", self.xpsr),
        ]
    }
}
