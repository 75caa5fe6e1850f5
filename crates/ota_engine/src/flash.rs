use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use embedded_storage::nor_flash::NorFlash;

use crate::config::SECTOR_SIZE;
use crate::error::{OtaError, OtaErrorKind, map_flash_error};

/// Flash shared with the rest of the system. Every call takes the lock for
/// exactly one erase, write or read and releases it before returning.
///
/// Addresses are absolute. `base` is the address of flash offset zero.
pub struct SharedFlash<'a, M: RawMutex, F: NorFlash> {
    flash: &'a Mutex<M, RefCell<F>>,
    base: u32,
}

impl<'a, M: RawMutex, F: NorFlash> SharedFlash<'a, M, F> {
    /// Streamed data lands at arbitrary byte boundaries, so the device must
    /// accept single byte writes.
    pub fn new(flash: &'a Mutex<M, RefCell<F>>, base: u32) -> Result<Self, OtaError> {
        if F::WRITE_SIZE != 1 || (SECTOR_SIZE as usize).checked_rem(F::ERASE_SIZE) != Some(0) {
            return Err(OtaError::new(OtaErrorKind::StorageFault));
        }
        Ok(Self { flash, base })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    fn offset(&self, address: u32) -> Result<u32, OtaError> {
        address
            .checked_sub(self.base)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))
    }

    fn with_flash<R>(
        &self,
        op: impl FnOnce(&mut F) -> Result<R, OtaError>,
    ) -> Result<R, OtaError> {
        self.flash.lock(|cell| {
            let mut flash = cell
                .try_borrow_mut()
                .map_err(|_| OtaError::new(OtaErrorKind::StorageFault))?;
            op(&mut flash)
        })
    }

    /// Erases whole sectors starting at `address` until `len` bytes are covered.
    pub fn erase(&self, address: u32, len: u32) -> Result<(), OtaError> {
        let from = self.offset(address)?;
        if from.checked_rem(SECTOR_SIZE) != Some(0) {
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        let sectors = len
            .checked_add(SECTOR_SIZE - 1)
            .map(|rounded| rounded / SECTOR_SIZE)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?
            .max(1);
        let to = sectors
            .checked_mul(SECTOR_SIZE)
            .and_then(|bytes| from.checked_add(bytes))
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        log::debug!("erase {:#010x}..{:#010x}", address, self.base.saturating_add(to));
        self.with_flash(|flash| flash.erase(from, to).map_err(map_flash_error))
    }

    pub fn write(&self, address: u32, bytes: &[u8]) -> Result<(), OtaError> {
        let offset = self.offset(address)?;
        self.with_flash(|flash| flash.write(offset, bytes).map_err(map_flash_error))
    }

    pub fn read(&self, address: u32, bytes: &mut [u8]) -> Result<(), OtaError> {
        let offset = self.offset(address)?;
        self.with_flash(|flash| flash.read(offset, bytes).map_err(map_flash_error))
    }

    pub fn read_u32(&self, address: u32) -> Result<u32, OtaError> {
        let mut word = [0u8; 4];
        self.read(address, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}
