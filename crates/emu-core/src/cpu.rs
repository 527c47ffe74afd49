//! CPU core trait.

use crate::{Bus, Fault};

/// An instruction-stepped CPU core.
///
/// One `step()` executes exactly one instruction against the supplied bus
/// and runs to completion before returning; the embedder sees every state
/// mutation as atomic. The CPU does not own the bus, so the embedder can
/// share it with other components between steps.
pub trait Cpu<B: Bus> {
    /// Execute one instruction. Returns the T-states consumed, or the
    /// sticky fault that stopped the core.
    fn step(&mut self, bus: &mut B) -> Result<u32, Fault>;

    /// Reset the CPU to its power-on state, clearing any sticky fault.
    fn reset(&mut self);

    /// Current program counter.
    fn pc(&self) -> u16;

    /// True if the CPU has executed HALT and not been reset.
    fn is_halted(&self) -> bool;
}
