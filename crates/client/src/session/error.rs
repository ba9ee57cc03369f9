//! Errors ending a transfer session.

use std::time::Duration;

use protocol::ProtocolError;
use thiserror::Error;

/// Exit code when the user declined a confirmation.
pub const EXIT_USER_ABORT: u8 = 254;

/// Exit code for every failure without a device error code.
pub const EXIT_FAILURE: u8 = 255;

/// Errors that can end a transfer session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Input, device or transfer error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The user declined to continue.
    #[error("aborted by user: {0}")]
    Aborted(String),

    /// The stored file does not match what was sent.
    #[error("verification failed: device reports CRC32 {remote:#010x}, expected {local:#010x}")]
    VerificationFailed { local: u32, remote: u32 },

    /// The bus or the device could not be reached.
    #[error("connection failed: {0}")]
    Connectivity(#[source] ProtocolError),

    /// The device did not answer in time.
    #[error("device did not answer within {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Process exit code for this error.
    ///
    /// Device error codes are passed through; a declined confirmation and
    /// all other failures have their own codes.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Protocol(e) => e.remote_code().unwrap_or(EXIT_FAILURE),
            Self::Aborted(_) => EXIT_USER_ABORT,
            _ => EXIT_FAILURE,
        }
    }

    /// Returns `true` for errors that leave no usable connection.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Connectivity(_) | Self::Timeout(_) => true,
            Self::Protocol(e) => e.is_connectivity(),
            _ => false,
        }
    }
}
