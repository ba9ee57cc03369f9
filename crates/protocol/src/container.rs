//! Decoder for block-structured firmware containers.
//!
//! # Block Format
//!
//! A container is a sequence of 512-byte blocks, all fields little-endian:
//! - offset 0: first start magic `0x0A324655`
//! - offset 4: second start magic `0x9E5D5157`
//! - offset 8: flags (see [`BlockFlags`])
//! - offset 12: target flash address
//! - offset 16: payload length (at most 476)
//! - offset 20: sequence index of this block
//! - offset 24: total block count
//! - offset 28: family id, file size or zero
//! - offset 32: payload, followed by extension tags when flagged
//! - offset 508: end magic `0x0AB16F30`
//!
//! # Extension Tags
//!
//! Each tag is a 1-byte total size, a 3-byte type and `size - 4` data bytes,
//! padded to the next 4-byte boundary. The list ends with an all-zero
//! size/type word.
//!
//! Slices that fail magic validation are skipped. Decoding stops at the block
//! whose sequence index is the last one announced by its block count.

use tracing::{debug, warn};

use crate::error::{MisalignmentKind, ProtocolError, Result};

/// Size of one container block.
pub const BLOCK_SIZE: usize = 512;

/// First magic word, at offset 0.
pub const MAGIC_START0: u32 = 0x0A32_4655;

/// Second magic word, at offset 4.
pub const MAGIC_START1: u32 = 0x9E5D_5157;

/// Final magic word, at offset 508.
pub const MAGIC_END: u32 = 0x0AB1_6F30;

/// Offset of the payload inside a block.
pub const PAYLOAD_OFFSET: usize = 32;

/// Offset of the end magic, which also bounds the tag region.
pub const END_MAGIC_OFFSET: usize = 508;

/// Largest payload a block can carry.
pub const MAX_PAYLOAD_LEN: usize = END_MAGIC_OFFSET - PAYLOAD_OFFSET;

/// Largest zero gap filled between two blocks (10 MiB).
pub const MAX_PADDING: u64 = 10 * 1024 * 1024;

/// Largest flash image a container may assemble (32 MiB).
pub const MAX_IMAGE_SIZE: u64 = 32 * 1024 * 1024;

/// Size of one flash word; padding is written in whole words.
pub const WORD_SIZE: u64 = 4;

/// Flags word of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u32);

impl BlockFlags {
    /// Payload is not meant for main flash.
    pub const NOT_MAIN_FLASH: u32 = 0x0000_0001;
    /// Extension tags follow the payload.
    pub const EXTENSION_TAGS: u32 = 0x0000_8000;

    /// Create flags from a raw header word.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get the raw header word.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Check if the payload is excluded from the flash image.
    #[inline]
    pub fn is_not_main_flash(self) -> bool {
        self.has(Self::NOT_MAIN_FLASH)
    }

    /// Check if extension tags follow the payload.
    #[inline]
    pub fn has_extension_tags(self) -> bool {
        self.has(Self::EXTENSION_TAGS)
    }
}

/// Known extension tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    FirmwareVersion,
    Description,
    PageSize,
    Sha2,
    DeviceTypeIdentifier,
    /// Application identity of KNX firmware: `[openKnxId, appNumber, appVersion, appRevision]`.
    KnxApplication,
}

impl TagType {
    /// The 24-bit type value as stored in the container.
    pub const fn value(self) -> u32 {
        match self {
            TagType::FirmwareVersion => 0x9f_c7bc,
            TagType::Description => 0x65_0d9d,
            TagType::PageSize => 0x0b_e9f7,
            TagType::Sha2 => 0xb4_6db0,
            TagType::DeviceTypeIdentifier => 0xc8_a729,
            TagType::KnxApplication => 0x58_4e4b,
        }
    }

    /// Look up a known tag type.
    pub fn from_value(value: u32) -> Option<Self> {
        [
            TagType::FirmwareVersion,
            TagType::Description,
            TagType::PageSize,
            TagType::Sha2,
            TagType::DeviceTypeIdentifier,
            TagType::KnxApplication,
        ]
        .into_iter()
        .find(|t| t.value() == value)
    }
}

/// A metadata record from a block's extension region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Total size including the 4 header bytes, without padding.
    pub size: u8,
    /// 24-bit tag type.
    pub tag_type: u32,
    /// Tag payload (`size - 4` bytes).
    pub data: Vec<u8>,
}

impl Tag {
    /// Returns the known type of this tag, if any.
    pub fn known_type(&self) -> Option<TagType> {
        TagType::from_value(self.tag_type)
    }

    /// Returns `true` if this tag is of the given type.
    pub fn is(&self, tag_type: TagType) -> bool {
        self.tag_type == tag_type.value()
    }
}

/// One validated container block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub flags: BlockFlags,
    pub address: u32,
    /// Declared payload length.
    pub payload_len: u32,
    pub sequence: u32,
    pub block_count: u32,
    /// Family id, file size or zero, depending on the flags.
    pub info: u32,
    /// Payload bytes; trailing zeros are trimmed on the last block.
    pub payload: Vec<u8>,
    pub tags: Vec<Tag>,
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl Block {
    /// Parse one block-sized slice.
    ///
    /// Returns `None` if the slice is not a valid block: wrong length, bad
    /// magic or an oversized payload.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != BLOCK_SIZE {
            return None;
        }

        if read_u32(bytes, 0) != MAGIC_START0
            || read_u32(bytes, 4) != MAGIC_START1
            || read_u32(bytes, END_MAGIC_OFFSET) != MAGIC_END
        {
            return None;
        }

        let payload_len = read_u32(bytes, 16);
        if payload_len as usize > MAX_PAYLOAD_LEN {
            return None;
        }

        let flags = BlockFlags::from_bits(read_u32(bytes, 8));
        let sequence = read_u32(bytes, 20);
        let block_count = read_u32(bytes, 24);

        let payload_end = PAYLOAD_OFFSET + payload_len as usize;
        let mut payload = bytes[PAYLOAD_OFFSET..payload_end].to_vec();

        let mut block = Self {
            flags,
            address: read_u32(bytes, 12),
            payload_len,
            sequence,
            block_count,
            info: read_u32(bytes, 28),
            payload: Vec::new(),
            tags: Vec::new(),
        };

        // Images are zero padded at the very end only
        if block.is_last() {
            let used = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            payload.truncate(used);
        }
        block.payload = payload;

        if flags.has_extension_tags() {
            block.tags = parse_tags(bytes, payload_end);
        }

        Some(block)
    }

    /// Returns `true` if this block is the last one of its container.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.block_count != 0 && self.sequence >= self.block_count - 1
    }

    /// Returns `true` if the payload belongs in the flash image.
    #[inline]
    pub fn is_main_flash(&self) -> bool {
        !self.flags.is_not_main_flash()
    }
}

/// Walk the tag list starting at `offset`.
fn parse_tags(bytes: &[u8], mut offset: usize) -> Vec<Tag> {
    let mut tags = Vec::new();

    while offset + 4 <= END_MAGIC_OFFSET {
        let header = read_u32(bytes, offset);
        if header == 0 {
            break;
        }

        let size = bytes[offset];
        let tag_type = header >> 8;
        let end = offset + size as usize;
        if size < 4 || end > END_MAGIC_OFFSET {
            warn!(offset, size, "Malformed extension tag, ignoring the rest of the list");
            break;
        }

        tags.push(Tag {
            size,
            tag_type,
            data: bytes[offset + 4..end].to_vec(),
        });

        let padding = (4 - size as usize % 4) % 4;
        offset = end + padding;
    }

    tags
}

/// A decoded container: the flash image and all metadata tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    image: Vec<u8>,
    tags: Vec<Tag>,
    valid_blocks: usize,
    skipped_blocks: usize,
}

impl Container {
    /// The assembled flash image.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Consume the container, returning the flash image.
    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    /// All tags in block order.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// First tag of the given type.
    pub fn find_tag(&self, tag_type: TagType) -> Option<&Tag> {
        self.tags.iter().find(|t| t.is(tag_type))
    }

    /// Number of blocks that passed validation.
    pub fn valid_blocks(&self) -> usize {
        self.valid_blocks
    }

    /// Number of slices skipped for failing validation.
    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }
}

/// Decode a container held in memory.
pub fn decode(bytes: &[u8]) -> Result<Container> {
    let mut container = Container::default();
    // Next address the image expects; set by the first main-flash block
    let mut cursor: Option<u64> = None;

    for (index, slice) in bytes.chunks(BLOCK_SIZE).enumerate() {
        let Some(block) = Block::parse(slice) else {
            warn!(index, "Block ignored: invalid magic number");
            container.skipped_blocks += 1;
            continue;
        };
        container.valid_blocks += 1;

        if block.is_main_flash() {
            let position = *cursor.get_or_insert(u64::from(block.address));
            let Some(gap) = u64::from(block.address).checked_sub(position) else {
                return Err(ProtocolError::Misaligned {
                    kind: MisalignmentKind::Reordered,
                    position,
                });
            };

            if gap > MAX_PADDING {
                return Err(ProtocolError::Misaligned {
                    kind: MisalignmentKind::GapTooLarge,
                    position,
                });
            }
            if gap % WORD_SIZE != 0 {
                return Err(ProtocolError::Misaligned {
                    kind: MisalignmentKind::NotWordAligned,
                    position,
                });
            }

            let image_len = container.image.len() as u64 + gap + u64::from(block.payload_len);
            if image_len > MAX_IMAGE_SIZE {
                return Err(ProtocolError::Misaligned {
                    kind: MisalignmentKind::ImageTooLarge,
                    position,
                });
            }

            container
                .image
                .resize(container.image.len() + gap as usize, 0);
            container.image.extend_from_slice(&block.payload);
            cursor = Some(u64::from(block.address) + u64::from(block.payload_len));
        }

        let is_last = block.is_last();
        container.tags.extend(block.tags);

        if is_last {
            debug!(index, "Reached last block");
            break;
        }
    }

    if container.valid_blocks == 0 {
        return Err(ProtocolError::NoValidBlock);
    }

    debug!(
        image_len = container.image.len(),
        tags = container.tags.len(),
        skipped = container.skipped_blocks,
        "Container decoded"
    );
    Ok(container)
}
