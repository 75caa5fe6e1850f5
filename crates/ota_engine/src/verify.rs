use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_storage::nor_flash::NorFlash;
use ota_container::{Checksum, Signature};

use crate::error::{OtaError, OtaErrorKind};
use crate::flash::SharedFlash;
use crate::plan::{DownloadEntry, DownloadPlan, ImageRole};
use crate::writer::WriteSummary;

/// Sums `len` flash bytes from `address`, one buffer at a time.
pub fn region_checksum<M: RawMutex, F: NorFlash>(
    flash: &SharedFlash<'_, M, F>,
    address: u32,
    len: u32,
    buffer: &mut [u8],
) -> Result<Checksum, OtaError> {
    if buffer.is_empty() {
        return Err(OtaError::new(OtaErrorKind::InvalidLayout));
    }
    let mut sum = Checksum::new();
    let mut done = 0u32;
    while done < len {
        let remaining = usize::try_from(len.saturating_sub(done)).unwrap_or(usize::MAX);
        let block = buffer
            .get_mut(..remaining.min(buffer.len()))
            .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
        let at = address
            .checked_add(done)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        flash.read(at, block)?;
        sum.update(block);
        done = done.saturating_add(u32::try_from(block.len()).unwrap_or(u32::MAX));
    }
    Ok(sum)
}

fn verify_entry<M: RawMutex, F: NorFlash>(
    flash: &SharedFlash<'_, M, F>,
    entry: &DownloadEntry,
    written: u32,
    signature: Option<&Signature>,
    buffer: &mut [u8],
) -> Result<(), OtaError> {
    let mut sum = region_checksum(flash, entry.destination, written, buffer)?;
    if let Some(signature) = signature {
        sum.update(signature.as_bytes());
    }
    if sum.value() != entry.expected_checksum {
        log::warn!(
            "{:?} checksum {:#010x} expected {:#010x}",
            entry.role,
            sum.value(),
            entry.expected_checksum
        );
        return Err(OtaError::new(OtaErrorKind::ChecksumMismatch));
    }
    log::debug!("{:?} checksum {:#010x} ok", entry.role, sum.value());
    Ok(())
}

/// Checks every written image against the checksum it was planned with.
/// The primary sum covers the written payload plus the held back signature.
pub fn verify_plan<M: RawMutex, F: NorFlash>(
    flash: &SharedFlash<'_, M, F>,
    plan: &DownloadPlan,
    summary: &WriteSummary,
    buffer: &mut [u8],
) -> Result<(), OtaError> {
    for entry in plan.entries() {
        match entry.role {
            ImageRole::Primary => {
                if entry.signature_len != 0 && summary.signature.is_none() {
                    return Err(OtaError::new(OtaErrorKind::ChecksumMismatch));
                }
                verify_entry(
                    flash,
                    entry,
                    summary.primary_written,
                    summary.signature.as_ref(),
                    buffer,
                )?
            }
            ImageRole::Secondary => {
                verify_entry(flash, entry, summary.secondary_written, None, buffer)?
            }
        }
    }
    Ok(())
}
