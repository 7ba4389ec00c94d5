//! Error types for the simulation core.

use thiserror::Error;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error type for all simulation errors.
///
/// Protocol errors (unknown tags, stale confirmations) are logged and
/// dropped by their handlers; they surface here only so callers can
/// observe them. Nothing in this enum unwinds the tick loop.
#[derive(Debug, Error)]
pub enum SimError {
    /// A wire command carried a type tag the registry does not know.
    #[error("Unknown command type tag: {0}")]
    UnknownCommandTag(u16),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(u64),

    /// A command effect could not be applied.
    #[error("Command failed (player {player}, tag {tag}): {message}")]
    CommandFailed {
        /// Issuing player.
        player: u32,
        /// Registry tag of the failing command.
        tag: u16,
        /// Reason the effect was rejected.
        message: String,
    },

    /// Invalid simulation state.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),

    /// Desync detected in multiplayer.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where the desync occurred.
        tick: i64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },

    /// Replay file version does not match this build.
    #[error("Replay version mismatch: expected {expected}, got {found}")]
    ReplayVersionMismatch {
        /// Version this build writes.
        expected: u32,
        /// Version found in the file.
        found: u32,
    },

    /// Configuration file parsing error.
    #[error("Failed to parse config: {0}")]
    ConfigParseError(String),
}
