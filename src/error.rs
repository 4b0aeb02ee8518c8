//! Fault kinds raised by the library and the crate-wide result alias.

use crate::arm::journal::CycleRecord;
use thiserror::Error;

/// All faults a Helix client call can surface.
///
/// Faults are never retried internally: a connectivity or protocol fault ends
/// the current session, a command fault ends only the offending one-shot call,
/// and a control fault additionally carries the cycle history recorded up to
/// the failure.
#[derive(Error, Debug)]
pub enum HelixError {
    /// An error was detected while a control session was running: a rejected
    /// command, a controller-reported safety trip, or a motion the controller
    /// aborted. Holds the drained diagnostic journal so the caller can
    /// reconstruct what was commanded in the cycles leading up to the fault.
    #[error("{message}")]
    Control {
        /// Recent (state, sent command) pairs, oldest first.
        log: Option<Vec<CycleRecord>>,
        message: String,
    },

    /// The controller rejected the connection because it speaks a different
    /// protocol version than this library.
    #[error("incompatible protocol version: controller speaks version {server_version}, library speaks {library_version}")]
    IncompatibleVersion {
        server_version: u16,
        library_version: u16,
    },

    /// The transport failed: connection refused, disconnected mid-session, or
    /// a bounded receive deadline expired.
    #[error("{message}")]
    Network { message: String },

    /// A malformed or unexpected message arrived from the controller.
    #[error("{message}")]
    Protocol { message: String },

    /// A one-shot request (gripper operation, parameter setter) was rejected
    /// by the remote side. Independent of any control session.
    #[error("{message}")]
    Command { message: String },

    /// The caller violated the API contract, e.g. started a control session
    /// without supplying any callback. Detected before network I/O happens.
    #[error("{message}")]
    Contract { message: String },

    /// Realtime scheduling priority could not be acquired for the control
    /// thread.
    #[error("{message}")]
    Realtime { message: String },
}

/// Builds a [`HelixError::Command`] from a static description.
pub(crate) fn command_fault(message: &'static str) -> HelixError {
    HelixError::Command {
        message: message.to_string(),
    }
}

/// Result type used throughout the crate.
pub type HelixResult<T> = Result<T, HelixError>;
