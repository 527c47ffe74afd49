//! Sticky fatal errors surfaced through `step()`.

use thiserror::Error;

/// A fatal condition that stops the core until `reset()`.
///
/// Faults are sticky: once one is raised, every subsequent `step()` returns
/// the same fault without fetching.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reserved for binary compatibility with older embedders. The DAA
    /// correction algorithm is total and never raises it.
    #[error("DAA invalid value")]
    DaaInvalid,

    /// The opcode (or prefixed opcode) is not in the supported set.
    #[error("invalid opcode")]
    InvalidOpcode,

    /// The embedder signalled a failure from a bus callback.
    #[error("bus fault")]
    Bus,
}

impl Fault {
    /// Numeric code matching the C-style embedder surface.
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            Self::DaaInvalid => -1,
            Self::InvalidOpcode => -2,
            Self::Bus => -3,
        }
    }
}
