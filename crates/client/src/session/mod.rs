//! Transfer sessions with a single device.
//!
//! A [`TransferSession`] owns the bus connection and the device session,
//! reports what it does through [`TransferEvent`]s and ends with a
//! [`SessionError`] that maps to a process exit code.

pub mod error;
pub mod events;
pub mod transfer;

pub use error::{SessionError, EXIT_FAILURE, EXIT_USER_ABORT};
pub use events::{RecordingObserver, TransferEvent, TransferObserver, TransferState};
pub use transfer::{
    DeviceInfo, SessionOptions, TransferReport, TransferSession, FIRMWARE_TARGET,
    RESTART_FUNCTION_ID, RESTART_OBJECT_INDEX,
};
