#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Wire format of the multi-image firmware container.
//!
//! A container starts with a file header followed by `header_count` image
//! header records, each `image_header_len` bytes long. Every record names a
//! sub-image by a four byte tag and says where its payload sits in the
//! stream and where it belongs in flash:
//!
//! ```text
//! file header  : version u32 | header_count u32
//! image header : tag [u8; 4] | header_len u32 | checksum u32
//!              | image_len u32 | offset u32 | flash_address u32
//! ```
//!
//! All integers are little endian. The payload of the primary image starts
//! with an eight byte [`Signature`].

pub mod builder;
pub mod checksum;


use thiserror_no_std::Error;

pub use checksum::Checksum;

pub const FILE_HEADER_LEN: usize = 8;
pub const IMAGE_HEADER_RECORD_LEN: usize = 24;
/// Bytes read before the full header size is known: the file header plus
/// the first eight bytes of the first image header record.
pub const HEADER_PROLOGUE_LEN: usize = 16;
pub const SIGNATURE_LEN: usize = 8;
pub const IMAGE_TAG_LEN: usize = 4;
/// The secondary tag is compared on its first three bytes only.
pub const SECONDARY_TAG_LEN: usize = 3;

const TAG_OFFSET: usize = 0;
const HEADER_LEN_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 8;
const IMAGE_LEN_OFFSET: usize = 12;
const OFFSET_OFFSET: usize = 16;
const FLASH_ADDRESS_OFFSET: usize = 20;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContainerError {
    #[error("header declares {declared} bytes but only {received} were received")]
    HeaderIncomplete { declared: usize, received: usize },
    #[error("no image header matched the requested tag")]
    NoMatchingImage,
    #[error("header field is out of range")]
    MalformedHeader,
    #[error("header of {declared} bytes does not fit a {capacity} byte buffer")]
    HeaderTooLarge { declared: usize, capacity: usize },
    #[error("output buffer of {0} bytes is too small")]
    OutputTooSmall(usize),
    #[error("too many images for one container")]
    TooManyImages,
    #[error("image payloads overlap in the stream")]
    OverlappingImages,
}

pub(crate) fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let end = at.checked_add(4)?;
    let word: [u8; 4] = bytes.get(at..end)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

pub(crate) fn write_u32_le(bytes: &mut [u8], at: usize, value: u32) -> Option<()> {
    let end = at.checked_add(4)?;
    bytes.get_mut(at..end)?.copy_from_slice(&value.to_le_bytes());
    Some(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageTag([u8; IMAGE_TAG_LEN]);

impl ImageTag {
    pub const OTA1: ImageTag = ImageTag(*b"OTA1");
    pub const OTA2: ImageTag = ImageTag(*b"OTA2");
    pub const RDP: ImageTag = ImageTag(*b"RDP\0");

    pub const fn new(bytes: [u8; IMAGE_TAG_LEN]) -> Self {
        ImageTag(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IMAGE_TAG_LEN] {
        &self.0
    }

    fn matches_prefix(&self, other: &ImageTag, len: usize) -> bool {
        match (self.0.get(..len), other.0.get(..len)) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }

    /// Four byte compare used for the primary image.
    pub fn matches_primary(&self, wanted: &ImageTag) -> bool {
        self.matches_prefix(wanted, IMAGE_TAG_LEN)
    }

    /// Three byte compare against `RDP`.
    pub fn is_secondary(&self) -> bool {
        self.matches_prefix(&ImageTag::RDP, SECONDARY_TAG_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileHeader {
    pub version: u32,
    pub header_count: u32,
}

impl FileHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        let version = read_u32_le(bytes, 0).ok_or(ContainerError::HeaderIncomplete {
            declared: FILE_HEADER_LEN,
            received: bytes.len(),
        })?;
        let header_count = read_u32_le(bytes, 4).ok_or(ContainerError::HeaderIncomplete {
            declared: FILE_HEADER_LEN,
            received: bytes.len(),
        })?;
        Ok(Self {
            version,
            header_count,
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<(), ContainerError> {
        write_u32_le(out, 0, self.version)
            .and_then(|_| write_u32_le(out, 4, self.header_count))
            .ok_or(ContainerError::OutputTooSmall(out.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub tag: ImageTag,
    pub header_len: u32,
    pub checksum: u32,
    pub image_len: u32,
    /// Position of the payload counted from the first byte of the stream.
    pub offset: u32,
    pub flash_address: u32,
}

impl ImageHeader {
    pub fn decode(record: &[u8]) -> Result<Self, ContainerError> {
        let incomplete = ContainerError::HeaderIncomplete {
            declared: IMAGE_HEADER_RECORD_LEN,
            received: record.len(),
        };
        let tag: [u8; IMAGE_TAG_LEN] = record
            .get(TAG_OFFSET..HEADER_LEN_OFFSET)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(incomplete)?;
        Ok(Self {
            tag: ImageTag::new(tag),
            header_len: read_u32_le(record, HEADER_LEN_OFFSET).ok_or(incomplete)?,
            checksum: read_u32_le(record, CHECKSUM_OFFSET).ok_or(incomplete)?,
            image_len: read_u32_le(record, IMAGE_LEN_OFFSET).ok_or(incomplete)?,
            offset: read_u32_le(record, OFFSET_OFFSET).ok_or(incomplete)?,
            flash_address: read_u32_le(record, FLASH_ADDRESS_OFFSET).ok_or(incomplete)?,
        })
    }

    /// Writes the record and fills any padding up to `out.len()` with zeros.
    pub fn encode(&self, out: &mut [u8]) -> Result<(), ContainerError> {
        let too_small = ContainerError::OutputTooSmall(out.len());
        out.get_mut(TAG_OFFSET..HEADER_LEN_OFFSET)
            .ok_or(too_small)?
            .copy_from_slice(self.tag.as_bytes());
        write_u32_le(out, HEADER_LEN_OFFSET, self.header_len).ok_or(too_small)?;
        write_u32_le(out, CHECKSUM_OFFSET, self.checksum).ok_or(too_small)?;
        write_u32_le(out, IMAGE_LEN_OFFSET, self.image_len).ok_or(too_small)?;
        write_u32_le(out, OFFSET_OFFSET, self.offset).ok_or(too_small)?;
        write_u32_le(out, FLASH_ADDRESS_OFFSET, self.flash_address).ok_or(too_small)?;
        if let Some(padding) = out.get_mut(IMAGE_HEADER_RECORD_LEN..) {
            padding.fill(0);
        }
        Ok(())
    }

    /// Stream position one past the last payload byte.
    pub fn end_offset(&self) -> Option<u32> {
        self.offset.checked_add(self.image_len)
    }
}

/// The first [`HEADER_PROLOGUE_LEN`] bytes of a container. Enough to know how
/// large the whole header block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrologue {
    pub file: FileHeader,
    pub image_header_len: u32,
}

impl HeaderPrologue {
    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < HEADER_PROLOGUE_LEN {
            return Err(ContainerError::HeaderIncomplete {
                declared: HEADER_PROLOGUE_LEN,
                received: bytes.len(),
            });
        }
        let file = FileHeader::decode(bytes)?;
        let image_header_len = read_u32_le(bytes, FILE_HEADER_LEN.saturating_add(HEADER_LEN_OFFSET))
            .ok_or(ContainerError::MalformedHeader)?;
        let prologue = Self {
            file,
            image_header_len,
        };
        prologue.header_block_len()?;
        Ok(prologue)
    }

    /// `header_count * image_header_len + 8`
    pub fn header_block_len(&self) -> Result<usize, ContainerError> {
        if self.file.header_count == 0 {
            return Err(ContainerError::MalformedHeader);
        }
        let record_len = usize::try_from(self.image_header_len)
            .map_err(|_| ContainerError::MalformedHeader)?;
        if record_len < IMAGE_HEADER_RECORD_LEN {
            return Err(ContainerError::MalformedHeader);
        }
        usize::try_from(self.file.header_count)
            .ok()
            .and_then(|count| count.checked_mul(record_len))
            .and_then(|records| records.checked_add(FILE_HEADER_LEN))
            .ok_or(ContainerError::MalformedHeader)
    }
}

/// Header block of a container reduced to the images one bank cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHeader {
    pub file: FileHeader,
    pub image_header_len: u32,
    pub primary: ImageHeader,
    pub secondary: Option<ImageHeader>,
}

impl TargetHeader {
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn header_block_len(&self) -> Result<usize, ContainerError> {
        HeaderPrologue {
            file: self.file,
            image_header_len: self.image_header_len,
        }
        .header_block_len()
    }
}

/// Scans every record of a received header block.
///
/// The primary tag and `RDP` are matched independently and the scan never
/// stops early, so a later record with the same tag replaces an earlier one.
pub fn parse_target_header(
    block: &[u8],
    primary_tag: ImageTag,
) -> Result<TargetHeader, ContainerError> {
    let prologue = HeaderPrologue::decode(block)?;
    let declared = prologue.header_block_len()?;
    if declared > block.len() {
        return Err(ContainerError::HeaderIncomplete {
            declared,
            received: block.len(),
        });
    }

    let record_len =
        usize::try_from(prologue.image_header_len).map_err(|_| ContainerError::MalformedHeader)?;
    let records = block
        .get(FILE_HEADER_LEN..declared)
        .ok_or(ContainerError::MalformedHeader)?;

    let mut primary = None;
    let mut secondary = None;
    for record in records.chunks_exact(record_len) {
        let header = ImageHeader::decode(record)?;
        if header.tag.matches_primary(&primary_tag) {
            primary = Some(header);
            continue;
        }
        if header.tag.is_secondary() {
            secondary = Some(header);
        }
    }

    let Some(primary) = primary else {
        return Err(ContainerError::NoMatchingImage);
    };

    Ok(TargetHeader {
        file: prologue.file,
        image_header_len: prologue.image_header_len,
        primary,
        secondary,
    })
}

/// The eight bytes that lead the primary payload. Written to flash last, so
/// a bank without them never boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub const fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Signature(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
        Some(Signature(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}
