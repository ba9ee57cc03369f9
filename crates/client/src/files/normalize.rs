//! Conversion of local input files into the gzip stream stored on the device.
//!
//! Three encodings are accepted, chosen by file extension:
//! - `.bin`: raw image, compressed on the fly
//! - `.gz`: already compressed, copied through unchanged
//! - `.uf2`: firmware container, decoded to its image and then compressed
//!
//! The same conversion feeds both the upload and the resume comparison, so
//! the CRC computed locally covers the bytes the device actually stored.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use protocol::{container, crc32, ApplicationIdentity, ProtocolError, Result, Tag, TagType};
use tracing::debug;

/// Encoding of a local input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Raw binary image.
    Binary,
    /// Gzip-compressed image.
    Gzip,
    /// Block-structured firmware container.
    Container,
}

impl InputFormat {
    /// Determine the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "bin" => Ok(Self::Binary),
            "gz" => Ok(Self::Gzip),
            "uf2" => Ok(Self::Container),
            _ => Err(ProtocolError::UnsupportedFormat {
                extension: format!(".{extension}"),
            }),
        }
    }

    /// Returns `true` if the format can carry an application identity.
    pub fn carries_identity(self) -> bool {
        self == Self::Container
    }
}

/// A local input converted to the transfer encoding.
#[derive(Debug, Clone)]
pub struct NormalizedStream {
    /// Gzip stream to transfer.
    pub bytes: Vec<u8>,
    /// Length of the content before compression.
    pub original_size: u64,
    /// Encoding of the input.
    pub format: InputFormat,
    /// Container tags; empty for other formats.
    pub tags: Vec<Tag>,
}

impl NormalizedStream {
    /// Length of the stream that will be transferred.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// CRC32 of the complete stream.
    pub fn crc32(&self) -> u32 {
        crc32(&self.bytes)
    }

    /// Returns `true` if compression changed the length.
    pub fn is_compressed(&self) -> bool {
        self.original_size != self.len()
    }

    /// Application identity carried by the container, if any.
    ///
    /// `Some(Err(_))` means the tag exists but is malformed.
    pub fn firmware_identity(&self) -> Option<Result<ApplicationIdentity>> {
        self.tags
            .iter()
            .find(|tag| tag.is(TagType::KnxApplication))
            .map(ApplicationIdentity::from_tag)
    }
}

/// Read and convert a local input file.
pub fn normalize(path: &Path) -> Result<NormalizedStream> {
    let format = InputFormat::from_path(path)?;
    let raw = fs::read(path)?;
    normalize_bytes(format, &raw)
}

/// Convert already loaded input bytes.
pub fn normalize_bytes(format: InputFormat, raw: &[u8]) -> Result<NormalizedStream> {
    let stream = match format {
        InputFormat::Binary => NormalizedStream {
            bytes: gzip(raw)?,
            original_size: raw.len() as u64,
            format,
            tags: Vec::new(),
        },
        InputFormat::Gzip => NormalizedStream {
            bytes: raw.to_vec(),
            original_size: raw.len() as u64,
            format,
            tags: Vec::new(),
        },
        InputFormat::Container => {
            let decoded = container::decode(raw)?;
            let tags = decoded.tags().to_vec();
            let image = decoded.into_image();
            NormalizedStream {
                bytes: gzip(&image)?,
                original_size: image.len() as u64,
                format,
                tags,
            }
        }
    };

    debug!(
        ?format,
        original = stream.original_size,
        transferred = stream.len(),
        "Input normalized"
    );
    Ok(stream)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
