//! Engine error type.

use std::io;

/// Errors surfaced by the engine.
///
/// Loop functions return `Result<(), Error>` internally; [`Error::Closing`]
/// is the shutdown sentinel that unwinds a loop without being reported to
/// the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine is shutting down.
    #[error("engine is closing")]
    Closing,

    /// The address string could not be parsed or resolved.
    #[error("invalid address: {0}")]
    Addr(String),

    /// The configuration could not be loaded or validated.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operating system error outside a single connection's lifecycle.
    #[error(transparent)]
    Io(#[from] io::Error),
}
