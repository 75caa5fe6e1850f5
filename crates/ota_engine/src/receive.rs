use embedded_io::Read;
use ota_container::{HEADER_PROLOGUE_LEN, HeaderPrologue};

use crate::error::{OtaError, OtaErrorKind};

pub const FILE_INFO_LEN: usize = 12;

/// Reads until `buf` is full or the stream ends. Returns the byte count.
pub fn read_full<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<usize, OtaError> {
    let mut filled = 0usize;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        let count = stream.read(rest).map_err(OtaError::stream)?;
        if count == 0 {
            break;
        }
        filled = filled.saturating_add(count);
    }
    Ok(filled)
}

/// Pulls the whole header block into the front of `buffer` and returns it.
///
/// The prologue tells how long the block is, so no byte past the header is
/// consumed from the stream.
pub fn receive_header_block<'b, S: Read>(
    stream: &mut S,
    buffer: &'b mut [u8],
) -> Result<&'b [u8], OtaError> {
    if buffer.len() < HEADER_PROLOGUE_LEN {
        return Err(OtaError::new(OtaErrorKind::HeaderTooLarge));
    }
    let prologue = buffer
        .get_mut(..HEADER_PROLOGUE_LEN)
        .ok_or(OtaError::new(OtaErrorKind::HeaderTooLarge))?;
    let received = read_full(stream, prologue)?;
    if received < HEADER_PROLOGUE_LEN {
        log::warn!("header prologue cut short at {} bytes", received);
        return Err(OtaError::new(OtaErrorKind::HeaderIncomplete));
    }

    let declared = HeaderPrologue::decode(prologue)?.header_block_len()?;
    if declared > buffer.len() {
        log::warn!(
            "header block of {} bytes exceeds {} byte buffer",
            declared,
            buffer.len()
        );
        return Err(OtaError::new(OtaErrorKind::HeaderTooLarge));
    }

    let rest = buffer
        .get_mut(HEADER_PROLOGUE_LEN..declared)
        .ok_or(OtaError::new(OtaErrorKind::HeaderTooLarge))?;
    let received = read_full(stream, rest)?.saturating_add(HEADER_PROLOGUE_LEN);
    log::debug!("header block {} of {} bytes", received, declared);
    buffer
        .get(..received)
        .ok_or(OtaError::new(OtaErrorKind::HeaderIncomplete))
}

/// The 12 byte record some servers send in front of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub checksum: u32,
    /// Bank index in the legacy protocol, unused otherwise.
    pub reserved: u32,
    pub size: u32,
}

impl FileInfo {
    pub fn decode(bytes: &[u8; FILE_INFO_LEN]) -> Self {
        let word = |at: usize| {
            bytes
                .get(at..at.saturating_add(4))
                .and_then(|b| <[u8; 4]>::try_from(b).ok())
                .map(u32::from_le_bytes)
                .unwrap_or_default()
        };
        Self {
            checksum: word(0),
            reserved: word(4),
            size: word(8),
        }
    }

    pub fn encode(&self) -> [u8; FILE_INFO_LEN] {
        let mut out = [0u8; FILE_INFO_LEN];
        for (slot, value) in out
            .chunks_exact_mut(4)
            .zip([self.checksum, self.reserved, self.size])
        {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn receive<S: Read>(stream: &mut S) -> Result<Self, OtaError> {
        let mut raw = [0u8; FILE_INFO_LEN];
        let received = read_full(stream, &mut raw)?;
        if received < FILE_INFO_LEN {
            log::warn!("file info cut short at {} bytes", received);
            return Err(OtaError::new(OtaErrorKind::StreamTruncated));
        }
        let info = Self::decode(&raw);
        log::info!(
            "file info: checksum {:#010x} size {} bytes",
            info.checksum,
            info.size
        );
        Ok(info)
    }
}
