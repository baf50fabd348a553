//! Error taxonomy for the bridge
//!
//! Only connection-level failures are fatal. Everything else is scoped to the
//! operation that produced it: a failed flush keeps its damage for the next
//! paint, a failed allocation leaves the window unpresentable, a malformed
//! protocol value disables the feature that carried it.
//!
//! An incompatible configure proposal is not an error at all; it surfaces as
//! [`crate::window::Reconcile::Deferred`].

use std::io;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The display server could not be reached or lacks a required global.
    #[error("Failed to connect to display server: {0}")]
    Connect(String),

    /// The transport broke mid-session (socket error, read/flush failure).
    #[error("Display connection transport error: {0}")]
    Transport(String),

    /// Memory or protocol object allocation failed.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Every buffer in the queue is still held by the server.
    #[error("No free buffer available ({in_flight} in flight)")]
    BufferUnavailable { in_flight: usize },

    /// Attaching or committing a buffer was rejected.
    #[error("Failed to commit surface: {0}")]
    Commit(String),

    /// The server sent data we could not make sense of.
    #[error("Unexpected protocol data: {0}")]
    Protocol(String),

    /// A lock could not be acquired for a reason other than a timeout.
    #[error("Locking failure: {0}")]
    Lock(String),

    /// The requested window handle is not tracked.
    #[error("Unknown window {0:#x}")]
    UnknownWindow(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the process can no longer trust any window state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connect(_) | Error::Transport(_))
    }

    /// Whether a later retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::BufferUnavailable { .. } | Error::Commit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Connect("no socket".into()).is_fatal());
        assert!(Error::Transport("EPIPE".into()).is_fatal());
        assert!(!Error::BufferUnavailable { in_flight: 3 }.is_fatal());
        assert!(!Error::Allocation("mmap".into()).is_fatal());
        assert!(!Error::Protocol("bad format".into()).is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::BufferUnavailable { in_flight: 2 }.is_retryable());
        assert!(Error::Commit("rejected".into()).is_retryable());
        assert!(!Error::Allocation("oom".into()).is_retryable());
    }

    #[test]
    fn test_io_error_source_is_preserved() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.source().is_some());
        assert_eq!(format!("{}", err), "I/O error: denied");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            format!("{}", Error::BufferUnavailable { in_flight: 3 }),
            "No free buffer available (3 in flight)"
        );
        assert_eq!(format!("{}", Error::UnknownWindow(0x2a)), "Unknown window 0x2a");
    }
}
