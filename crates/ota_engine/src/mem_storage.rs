use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use crate::bank::{ConfigSlot, ConfigStore};
use crate::config::{ERASED_WORD, SECTOR_SIZE};
use crate::error::OtaError;

/// NOR flash backed by a byte slice. Erased bytes read `0xFF` and a byte can
/// only be programmed while erased.
pub struct MemFlash<'a> {
    bytes: &'a mut [u8],
    writes: usize,
    erases: usize,
}

impl<'a> MemFlash<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        bytes.fill(0xFF);
        Self {
            bytes,
            writes: 0,
            erases: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Number of write calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn erases(&self) -> usize {
        self.erases
    }
}

impl ErrorType for MemFlash<'_> {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash<'_> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = usize::try_from(offset).map_err(|_| NorFlashErrorKind::OutOfBounds)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        let src = self
            .bytes
            .get(start..end)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl NorFlash for MemFlash<'_> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        let start = usize::try_from(from).map_err(|_| NorFlashErrorKind::OutOfBounds)?;
        let end = usize::try_from(to).map_err(|_| NorFlashErrorKind::OutOfBounds)?;
        self.bytes
            .get_mut(start..end)
            .ok_or(NorFlashErrorKind::OutOfBounds)?
            .fill(0xFF);
        self.erases = self.erases.saturating_add(1);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = usize::try_from(offset).map_err(|_| NorFlashErrorKind::OutOfBounds)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        let dst = self
            .bytes
            .get_mut(start..end)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        if dst.iter().any(|byte| *byte != 0xFF) {
            return Err(NorFlashErrorKind::Other);
        }
        dst.copy_from_slice(bytes);
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}

/// Configuration words kept in RAM. Starts erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemConfig {
    pub bank2_address: u32,
    pub active_bank: u32,
    pub writes: u32,
}

impl MemConfig {
    pub const fn new() -> Self {
        Self {
            bank2_address: ERASED_WORD,
            active_bank: ERASED_WORD,
            writes: 0,
        }
    }
}

impl Default for MemConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemConfig {
    fn read_u32(&mut self, slot: ConfigSlot) -> Result<u32, OtaError> {
        Ok(match slot {
            ConfigSlot::Bank2Address => self.bank2_address,
            ConfigSlot::ActiveBank => self.active_bank,
        })
    }

    fn write_u32(&mut self, slot: ConfigSlot, value: u32) -> Result<(), OtaError> {
        match slot {
            ConfigSlot::Bank2Address => self.bank2_address = value,
            ConfigSlot::ActiveBank => self.active_bank = value,
        }
        self.writes = self.writes.saturating_add(1);
        Ok(())
    }
}
