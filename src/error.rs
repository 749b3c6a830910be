//! Error types for automaton construction and transformation.

use thiserror::Error;

/// Errors returned by arena, automaton and determinization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed ranges, a freed automaton passed where states are
    /// required, or an operation applied to the wrong kind of automaton.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An arena could not provide the requested memory: either a single
    /// allocation is larger than one page or the page limit is reached.
    #[error("out of memory")]
    OutOfMemory,

    /// A count does not fit into the size field used to store it.
    #[error("overflow: {0}")]
    Overflow(&'static str),
}

/// Result type for automaton operations.
pub type Result<T> = std::result::Result<T, Error>;
