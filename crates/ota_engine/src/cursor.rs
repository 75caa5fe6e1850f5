use core::ops::Range;

use heapless::Vec;
use ota_container::{SIGNATURE_LEN, Signature};

use crate::plan::DownloadEntry;

/// How one chunk splits up for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Leading chunk bytes that come before the image.
    pub skip: usize,
    /// Bytes taken into the signature.
    pub signature: usize,
    /// Chunk bytes to write to flash.
    pub payload: Range<usize>,
    /// Flash position of the payload, relative to the destination.
    pub flash_offset: u32,
    /// Chunk bytes this image accounted for. Anything after belongs to the
    /// next image.
    pub consumed: usize,
}

/// Progress through one planned image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCursor {
    stream_offset: u64,
    signature_len: usize,
    payload_len: u32,
    signature: Vec<u8, SIGNATURE_LEN>,
    written: u32,
}

impl ImageCursor {
    pub fn new(entry: &DownloadEntry) -> Self {
        Self {
            stream_offset: u64::from(entry.stream_offset),
            signature_len: usize::try_from(entry.signature_len)
                .unwrap_or(SIGNATURE_LEN)
                .min(SIGNATURE_LEN),
            payload_len: entry.payload_len,
            signature: Vec::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn is_complete(&self) -> bool {
        self.signature.len() == self.signature_len && self.written == self.payload_len
    }

    pub fn signature(&self) -> Option<Signature> {
        if self.signature_len == SIGNATURE_LEN {
            Signature::from_slice(&self.signature)
        } else {
            None
        }
    }

    /// Stream position of the next byte this image still needs.
    fn next_position(&self) -> u64 {
        let signature = u64::try_from(self.signature.len()).unwrap_or(u64::MAX);
        self.stream_offset
            .saturating_add(signature)
            .saturating_add(u64::from(self.written))
    }

    /// Splits `chunk`, which starts at stream position `position`, into the
    /// bytes before this image, signature bytes and payload bytes.
    ///
    /// Nothing is written here; the caller flashes `payload` at
    /// `destination + flash_offset`.
    pub fn feed(mut self, position: u64, chunk: &[u8]) -> (Self, Feed) {
        let len = chunk.len();
        let flash_offset = self.written;
        let skip = usize::try_from(self.next_position().saturating_sub(position))
            .unwrap_or(usize::MAX)
            .min(len);

        let mut index = skip;
        let signature_room = self.signature_len.saturating_sub(self.signature.len());
        let signature_take = signature_room.min(len.saturating_sub(index));
        let signature_end = index.saturating_add(signature_take);
        if let Some(bytes) = chunk.get(index..signature_end) {
            // room was checked above
            let _ = self.signature.extend_from_slice(bytes);
        }
        index = signature_end;

        let payload_room = usize::try_from(self.payload_len.saturating_sub(self.written))
            .unwrap_or(usize::MAX);
        let payload_take = payload_room.min(len.saturating_sub(index));
        let payload_end = index.saturating_add(payload_take);
        self.written = self
            .written
            .saturating_add(u32::try_from(payload_take).unwrap_or(u32::MAX));

        let feed = Feed {
            skip,
            signature: signature_take,
            payload: index..payload_end,
            flash_offset,
            consumed: payload_end,
        };
        (self, feed)
    }
}
