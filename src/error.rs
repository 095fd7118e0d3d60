//! Engine error type.

use thiserror::Error;

/// Errors returned by the protocol engine and its hook registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A caller passed an unrecognized hook name or otherwise bad input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine was destroyed; it can no longer be used.
    #[error("engine has been destroyed")]
    Destroyed,

    /// `destroy()` was called on an engine that is already destroyed.
    #[error("engine is already destroyed")]
    AlreadyDestroyed,

    /// Every negotiation candidate failed to bind.
    #[error("All candidates busy ({start}..={end})")]
    Exhausted {
        /// First candidate tried.
        start: u16,
        /// Last candidate tried.
        end: u16,
    },

    /// I/O failure outside of candidate negotiation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
