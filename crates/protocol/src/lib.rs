//! # KnxFtp Protocol Library
//!
//! Formats and wire contracts shared by the KnxFtp client: the firmware
//! container, chunk framing of the device file transfer service, KNX
//! addressing and the traits a bus backend implements.
//!
//! ## Overview
//!
//! - **Container**: decodes block-structured firmware containers into a flat
//!   image plus metadata tags
//! - **Framing**: package size negotiation and chunk arithmetic per protocol
//!   version
//! - **Identity**: application identity as carried by firmware and devices
//! - **Transport**: bus, device session and file transfer service contracts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       File transfer service (RPC)       │  FileTransferService
//! ├─────────────────────────────────────────┤
//! │        Device session (props)           │  DeviceSession
//! ├─────────────────────────────────────────┤
//! │      KNXnet/IP tunneling / routing      │  BusConnection
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ChunkLayout, ProtocolVersion};
//!
//! // 64-byte packages on a protocol 2 device carry 58 bytes of data each
//! let layout = ChunkLayout::new(64, ProtocolVersion::new(2)).unwrap();
//! assert_eq!(layout.payload_per_chunk(), 58);
//!
//! // 400 bytes already stored: the transfer continues at chunk 7
//! assert_eq!(layout.resume_sequence(400), 7);
//! ```
//!
//! ## Modules
//!
//! - [`address`]: KNX individual addresses
//! - [`container`]: Firmware container decoder
//! - [`framing`]: Chunk layout and protocol versions
//! - [`identity`]: Application identity
//! - [`transport`]: Collaborator traits
//! - [`error`]: Error types

pub mod address;
pub mod container;
pub mod error;
pub mod framing;
pub mod identity;
pub mod transport;

pub use address::IndividualAddress;
pub use container::{decode, Block, BlockFlags, Container, Tag, TagType, BLOCK_SIZE};
pub use error::{remote_message, MisalignmentKind, ProtocolError, Result};
pub use framing::{
    crc32, negotiate_package_size, ChunkLayout, NegotiatedPackageSize, ProtocolVersion,
    FIRST_DATA_SEQUENCE, HEADER_SIZE, LEGACY_HEADER_SIZE, MAX_HEADER_SIZE,
};
pub use identity::{ApplicationIdentity, IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID};
pub use transport::{
    BusConnection, DeviceSession, FileTransferService, RemoteEntry, RemoteFileInfo,
    TransferProgress, UploadRequest,
};
