//! Bank configuration kept in a reserved flash sector.
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_storage::nor_flash::NorFlash;
use ota_engine::config::{ERASED_WORD, SECTOR_SIZE};
use ota_engine::{ConfigSlot, ConfigStore, OtaError, OtaErrorKind, SharedFlash};

// Record layout: bank 2 address, active bank index. Little endian words.
const RECORD_WORDS: usize = 2;
const WORD_BYTES: usize = 4;
const RECORD_BYTES: usize = RECORD_WORDS * WORD_BYTES;

/// [`ConfigStore`] over the system data sector.
///
/// An erased word is programmed in place. Changing a programmed word needs
/// the sector erased, so the whole record is read back, patched and
/// rewritten.
pub struct SystemDataStore<'a, 'f, M: RawMutex, F: NorFlash> {
    flash: &'a SharedFlash<'f, M, F>,
    address: u32,
}

impl<'a, 'f, M: RawMutex, F: NorFlash> SystemDataStore<'a, 'f, M, F> {
    pub fn new(flash: &'a SharedFlash<'f, M, F>, address: u32) -> Result<Self, OtaError> {
        let offset = address
            .checked_sub(flash.base())
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        if offset.checked_rem(SECTOR_SIZE) != Some(0) {
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        Ok(Self { flash, address })
    }

    fn word_index(slot: ConfigSlot) -> usize {
        match slot {
            ConfigSlot::Bank2Address => 0,
            ConfigSlot::ActiveBank => 1,
        }
    }

    fn slot_address(&self, slot: ConfigSlot) -> Result<u32, OtaError> {
        let offset = Self::word_index(slot)
            .checked_mul(WORD_BYTES)
            .and_then(|offset| u32::try_from(offset).ok())
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        self.address
            .checked_add(offset)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))
    }

    fn rewrite_record(&self, slot: ConfigSlot, value: u32) -> Result<(), OtaError> {
        let mut record = [0u8; RECORD_BYTES];
        self.flash.read(self.address, &mut record)?;
        let start = Self::word_index(slot)
            .checked_mul(WORD_BYTES)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        let end = start
            .checked_add(WORD_BYTES)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        record
            .get_mut(start..end)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?
            .copy_from_slice(&value.to_le_bytes());

        log::debug!("rewriting system data at {:#010x}", self.address);
        self.flash.erase(self.address, SECTOR_SIZE)?;
        self.flash.write(self.address, &record)
    }
}

impl<M: RawMutex, F: NorFlash> ConfigStore for SystemDataStore<'_, '_, M, F> {
    fn read_u32(&mut self, slot: ConfigSlot) -> Result<u32, OtaError> {
        self.flash.read_u32(self.slot_address(slot)?)
    }

    fn write_u32(&mut self, slot: ConfigSlot, value: u32) -> Result<(), OtaError> {
        let address = self.slot_address(slot)?;
        let current = self.flash.read_u32(address)?;
        if current == value {
            return Ok(());
        }
        if current == ERASED_WORD {
            return self.flash.write(address, &value.to_le_bytes());
        }
        self.rewrite_record(slot, value)
    }
}
