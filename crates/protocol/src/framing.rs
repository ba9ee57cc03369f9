//! Chunk framing rules of the device file transfer protocol.
//!
//! # Chunk Format
//!
//! A transfer is a sequence of packages, each at most the negotiated package
//! size. Sequence 0 opens the transfer; data chunks are numbered from 1.
//! Every package starts with a header whose size depends on the protocol
//! version of the device:
//! - protocol 0 and 1: 3 bytes (2-byte sequence, 1-byte length)
//! - protocol 2 and later: 6 bytes (2-byte sequence, 4-byte length)
//!
//! The remaining bytes of a package carry file data, so chunk `n` holds the
//! bytes starting at `(n - 1) * (package_size - header_size)`.

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};

/// Sequence number of the first data chunk.
pub const FIRST_DATA_SEQUENCE: u32 = 1;

/// Chunk header size of protocol versions before 2.
pub const LEGACY_HEADER_SIZE: usize = 3;

/// Chunk header size of protocol version 2 and later.
pub const HEADER_SIZE: usize = 6;

/// Largest header of any protocol version.
///
/// Package sizes are negotiated before the protocol version is known, so
/// they must leave room for the largest header.
pub const MAX_HEADER_SIZE: usize = HEADER_SIZE;

/// CRC32 (IEEE) as the device computes it over stored files.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Protocol version announced by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    /// First version with the 6-byte chunk header.
    pub const WIDE_HEADER: ProtocolVersion = ProtocolVersion(2);

    /// Create a version from its number.
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    /// The version number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Bytes of every package taken by the chunk header.
    pub fn header_overhead(self) -> usize {
        if self < Self::WIDE_HEADER {
            LEGACY_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Devices on this version report an empty file while a previous
    /// transfer is still being committed to flash.
    pub fn reports_empty_while_committing(self) -> bool {
        self == Self::WIDE_HEADER
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    /// Parse the leading number of a remote version string such as `2.1.0`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let lead = s.split(['.', ' ', '-']).next().unwrap_or_default();
        let lead = lead.strip_prefix(['v', 'V']).unwrap_or(lead);
        lead.parse::<u8>()
            .map(Self)
            .map_err(|_| ProtocolError::InvalidResponse(format!("invalid protocol version: {s:?}")))
    }
}

/// Package size after negotiation with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedPackageSize {
    /// Size that will be used.
    pub size: usize,
    /// Size the caller asked for.
    pub requested: usize,
}

impl NegotiatedPackageSize {
    /// Returns `true` if the device forced a smaller package size.
    pub fn was_reduced(&self) -> bool {
        self.size < self.requested
    }
}

/// Clamp the requested package size to what fits in one device frame.
pub fn negotiate_package_size(requested: usize, max_frame_len: usize) -> Result<NegotiatedPackageSize> {
    let limit = max_frame_len.saturating_sub(MAX_HEADER_SIZE);
    let size = requested.min(limit);
    if size <= MAX_HEADER_SIZE {
        return Err(ProtocolError::InvalidResponse(format!(
            "package size {size} leaves no room for data (requested {requested}, max frame {max_frame_len})"
        )));
    }
    Ok(NegotiatedPackageSize { size, requested })
}

/// Layout of file data over numbered chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    package_size: usize,
    version: ProtocolVersion,
}

impl ChunkLayout {
    /// Create a layout for a package size and protocol version.
    pub fn new(package_size: usize, version: ProtocolVersion) -> Result<Self> {
        if package_size <= version.header_overhead() {
            return Err(ProtocolError::InvalidResponse(format!(
                "package size {package_size} too small for protocol {version}"
            )));
        }
        Ok(Self {
            package_size,
            version,
        })
    }

    /// Package size this layout was built for.
    pub fn package_size(&self) -> usize {
        self.package_size
    }

    /// Protocol version this layout was built for.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// File bytes carried by one chunk.
    pub fn payload_per_chunk(&self) -> usize {
        self.package_size - self.version.header_overhead()
    }

    /// Number of whole chunks covered by `len` bytes.
    pub fn completed_chunks(&self, len: u64) -> u64 {
        len / self.payload_per_chunk() as u64
    }

    /// Number of chunks needed for `len` bytes.
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.payload_per_chunk() as u64)
    }

    /// File offset of the first byte carried by chunk `sequence`.
    pub fn offset_of(&self, sequence: u32) -> u64 {
        u64::from(sequence.saturating_sub(FIRST_DATA_SEQUENCE)) * self.payload_per_chunk() as u64
    }

    /// Sequence number at which a transfer continues when `len` bytes are
    /// already stored remotely.
    pub fn resume_sequence(&self, len: u64) -> u32 {
        let completed = u32::try_from(self.completed_chunks(len)).unwrap_or(u32::MAX - 1);
        completed + FIRST_DATA_SEQUENCE
    }
}
