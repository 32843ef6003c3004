//! Engine error type.

use core::fmt;

/// Error type for engine operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// All group elements are already bound to other group IDs
    NoFreeGroup,
    /// Attempted to rebind a group element that already has an ID
    GroupAlreadyBound,
    /// The note pool is empty and stealing found no victim
    NoFreeNote,
    /// The fixed part table is full
    TooManyParts,
    /// A voice failed while rendering
    Render(&'static str),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NoFreeGroup => write!(f, "no unassigned group element available"),
            EngineError::GroupAlreadyBound => write!(f, "group element is already bound"),
            EngineError::NoFreeNote => write!(f, "no free note available"),
            EngineError::TooManyParts => write!(f, "part table is full"),
            EngineError::Render(msg) => write!(f, "render error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EngineError {}
