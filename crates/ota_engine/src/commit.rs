use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_storage::nor_flash::NorFlash;
use ota_container::Signature;

use crate::bank::{ConfigSlot, ConfigStore};
use crate::config::SECTOR_SIZE;
use crate::error::{OtaError, OtaErrorKind};
use crate::flash::SharedFlash;
use crate::plan::DownloadPlan;

/// Erases every region the plan writes to, at least one sector each.
pub fn erase_targets<M: RawMutex, F: NorFlash>(
    flash: &SharedFlash<'_, M, F>,
    plan: &DownloadPlan,
) -> Result<(), OtaError> {
    for entry in plan.entries() {
        let start = entry
            .region_start()
            .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
        let len = entry
            .region_len()
            .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
        log::info!("erase {:?} region {:#010x} ({} bytes)", entry.role, start, len);
        flash.erase(start, len)?;
    }
    Ok(())
}

/// Writes the signature, if any, then makes the target bank active. The
/// order matters: a bank without its signature never boots.
pub fn commit<M: RawMutex, F: NorFlash, C: ConfigStore>(
    flash: &SharedFlash<'_, M, F>,
    store: &mut C,
    plan: &DownloadPlan,
    signature: Option<&Signature>,
) -> Result<(), OtaError> {
    let bank_address = plan
        .bank_address()
        .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
    if let Some(signature) = signature {
        flash.write(bank_address, signature.as_bytes())?;
    }
    store.write_u32(ConfigSlot::ActiveBank, plan.target_bank().as_u32())?;
    log::info!(
        "committed {:?} at {:#010x}",
        plan.target_bank(),
        bank_address
    );
    Ok(())
}

/// Erases the first sector of the target bank so a half written image can
/// never carry a signature.
pub fn rollback<M: RawMutex, F: NorFlash>(
    flash: &SharedFlash<'_, M, F>,
    plan: &DownloadPlan,
) -> Result<(), OtaError> {
    let bank_address = plan
        .bank_address()
        .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
    log::warn!("rolling back {:?} at {:#010x}", plan.target_bank(), bank_address);
    flash.erase(bank_address, SECTOR_SIZE)
}
