//! Error types for the protocol crate.

use std::fmt;

use thiserror::Error;

/// Reason a container block could not be placed in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisalignmentKind {
    /// Block address lies before the end of the image assembled so far.
    Reordered,
    /// More than the allowed amount of zero padding would be needed.
    GapTooLarge,
    /// The gap to fill is not a multiple of the flash word size.
    NotWordAligned,
    /// The assembled image would exceed the size limit.
    ImageTooLarge,
}

impl fmt::Display for MisalignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MisalignmentKind::Reordered => f.write_str("block order is wrong"),
            MisalignmentKind::GapTooLarge => f.write_str("padding gap exceeds 10 MiB"),
            MisalignmentKind::NotWordAligned => {
                f.write_str("padding gap is not aligned to a word boundary")
            }
            MisalignmentKind::ImageTooLarge => f.write_str("image exceeds 32 MiB"),
        }
    }
}

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Input format errors
    /// The input file extension is not one of the supported encodings.
    #[error("unsupported file format: {extension}")]
    UnsupportedFormat {
        /// Extension of the rejected file, including the dot.
        extension: String,
    },

    /// No block of the container passed magic validation.
    #[error("container holds no valid block")]
    NoValidBlock,

    /// A valid block cannot be placed behind the previous one.
    #[error("misaligned container block at address {position:#010x}: {kind}")]
    Misaligned {
        /// What went wrong.
        kind: MisalignmentKind,
        /// Expected image address when the block was reached.
        position: u64,
    },

    // Device errors
    /// The device answered with a file system error code.
    #[error("device error {code:#04x}: {message}")]
    Remote {
        /// Error code reported by the device.
        code: u8,
        /// Text for the code, see [`remote_message`].
        message: &'static str,
    },

    /// A device response could not be interpreted.
    #[error("invalid device response: {0}")]
    InvalidResponse(String),

    /// An individual address could not be parsed.
    #[error("invalid individual address: {0}")]
    InvalidAddress(String),

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Transfer errors
    /// File or data transfer failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Remote content does not match what was sent.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// CRC32 of the local data.
        expected: u32,
        /// CRC32 reported by the device.
        actual: u32,
    },

    /// IO error while reading local files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Builds a [`ProtocolError::Remote`] for a device error code.
    pub fn remote(code: u8) -> Self {
        ProtocolError::Remote {
            code,
            message: remote_message(code),
        }
    }

    /// Returns `true` for errors caused by a corrupt or unsupported input file.
    ///
    /// These are never worth retrying.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedFormat { .. }
                | ProtocolError::NoValidBlock
                | ProtocolError::Misaligned { .. }
        )
    }

    /// Returns the device error code, if the device reported one.
    pub fn remote_code(&self) -> Option<u8> {
        match self {
            ProtocolError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if the failure came from the bus connection itself.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed(_) | ProtocolError::Timeout(_)
        )
    }
}

/// Human readable text for a device error code.
pub fn remote_message(code: u8) -> &'static str {
    match code {
        0x01 => "file system begin failed",
        0x02 => "file system format failed",
        0x03 => "file system not initialized",
        0x41 => "file already open",
        0x42 => "file can't be opened",
        0x43 => "file not opened",
        0x44 => "file can't be deleted",
        0x45 => "file can't be renamed",
        0x46 => "file can't seek position",
        0x81 => "dir already open",
        0x82 => "dir can't be opened",
        0x83 => "dir not opened",
        0x84 => "dir can't be deleted",
        0x85 => "dir can't be created",
        0x86 => "dir has no more files",
        _ => "unknown device error",
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
