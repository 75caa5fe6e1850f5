use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::Read;
use embedded_storage::nor_flash::NorFlash;
use ota_container::Signature;

use crate::cursor::ImageCursor;
use crate::error::{OtaError, OtaErrorKind};
use crate::flash::SharedFlash;
use crate::plan::{DownloadPlan, ImageRole};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub primary_written: u32,
    pub secondary_written: u32,
    pub signature: Option<Signature>,
    /// Stream bytes consumed, header included.
    pub received: u64,
}

/// Streams every planned image into flash using `buffer` for reads.
///
/// The stream must already be positioned at `plan.stream_start()`. Bytes
/// read past the end of one image are handed to the next without another
/// read. The signature is held back and returned, never written here.
pub fn stream_and_write<S: Read, M: RawMutex, F: NorFlash>(
    plan: &DownloadPlan,
    stream: &mut S,
    buffer: &mut [u8],
    flash: &SharedFlash<'_, M, F>,
) -> Result<WriteSummary, OtaError> {
    if buffer.is_empty() {
        return Err(OtaError::new(OtaErrorKind::InvalidLayout));
    }

    let mut position = u64::from(plan.stream_start());
    let mut start = 0usize;
    let mut end = 0usize;
    let mut summary = WriteSummary::default();

    for entry in plan.entries() {
        let mut cursor = ImageCursor::new(entry);
        while !cursor.is_complete() {
            if start == end {
                let count = stream.read(buffer).map_err(OtaError::stream)?;
                if count == 0 {
                    log::warn!(
                        "stream closed at {} with {:?} image at {} of {} bytes",
                        position,
                        entry.role,
                        cursor.written(),
                        entry.payload_len
                    );
                    return Err(OtaError::new(OtaErrorKind::StreamTruncated));
                }
                start = 0;
                end = count.min(buffer.len());
            }

            let chunk = buffer
                .get(start..end)
                .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
            let (next, feed) = cursor.feed(position, chunk);
            if !feed.payload.is_empty() {
                let bytes = chunk
                    .get(feed.payload.clone())
                    .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
                let address = entry
                    .destination
                    .checked_add(feed.flash_offset)
                    .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
                flash.write(address, bytes)?;
            }

            position = position.saturating_add(u64::try_from(feed.consumed).unwrap_or(u64::MAX));
            start = start.saturating_add(feed.consumed).min(end);
            cursor = next;
        }

        log::info!(
            "{:?} image {:?} complete, {} bytes at {:#010x}",
            entry.role,
            entry.tag.as_bytes(),
            cursor.written(),
            entry.destination
        );
        match entry.role {
            ImageRole::Primary => {
                summary.primary_written = cursor.written();
                summary.signature = cursor.signature();
            }
            ImageRole::Secondary => summary.secondary_written = cursor.written(),
        }
    }

    summary.received = position;
    Ok(summary)
}
