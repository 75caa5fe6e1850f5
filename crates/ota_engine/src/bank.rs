use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_storage::nor_flash::NorFlash;
use ota_container::{ImageHeader, ImageTag};
use serde::{Deserialize, Serialize};

use crate::config::{ERASED_WORD, IMAGE_HEADER_LEN, IMAGE_SIZE_OFFSET, OtaConfig};
use crate::error::{OtaError, OtaErrorKind};
use crate::flash::SharedFlash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BankIndex {
    Bank1,
    Bank2,
}

impl BankIndex {
    pub fn other(self) -> Self {
        match self {
            BankIndex::Bank1 => BankIndex::Bank2,
            BankIndex::Bank2 => BankIndex::Bank1,
        }
    }

    /// Value stored in the active bank slot and sent in the legacy handshake.
    pub fn as_u32(self) -> u32 {
        match self {
            BankIndex::Bank1 => 0,
            BankIndex::Bank2 => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(BankIndex::Bank1),
            1 => Some(BankIndex::Bank2),
            _ => None,
        }
    }

    pub fn image_tag(self) -> ImageTag {
        match self {
            BankIndex::Bank1 => ImageTag::OTA1,
            BankIndex::Bank2 => ImageTag::OTA2,
        }
    }

    /// `marker` is the address of a symbol placed right after the image
    /// header of the running image.
    pub fn from_running_address(marker: u32, config: &OtaConfig) -> Self {
        if config.bank1_address.checked_add(IMAGE_HEADER_LEN) == Some(marker) {
            BankIndex::Bank1
        } else {
            BankIndex::Bank2
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigSlot {
    Bank2Address,
    ActiveBank,
}

/// Durable words that survive a reboot.
pub trait ConfigStore {
    fn read_u32(&mut self, slot: ConfigSlot) -> Result<u32, OtaError>;
    fn write_u32(&mut self, slot: ConfigSlot, value: u32) -> Result<(), OtaError>;
}

/// Points the boot loader at `bank` without downloading anything.
pub fn select_boot_bank<C: ConfigStore>(store: &mut C, bank: BankIndex) -> Result<(), OtaError> {
    log::info!("select boot bank {:?}", bank);
    store.write_u32(ConfigSlot::ActiveBank, bank.as_u32())
}

pub struct BankResolver<'c> {
    config: &'c OtaConfig,
}

impl<'c> BankResolver<'c> {
    pub fn new(config: &'c OtaConfig) -> Self {
        Self { config }
    }

    /// Reads the bank 2 slot, seeding it with the configured default the
    /// first time. The result is sector aligned and never the erased word.
    pub fn bank2_address<C: ConfigStore>(&self, store: &mut C) -> Result<u32, OtaError> {
        let mut address = store.read_u32(ConfigSlot::Bank2Address)?;
        if address == ERASED_WORD {
            log::info!(
                "bank 2 address unset, using {:#010x}",
                self.config.default_bank2_address
            );
            store.write_u32(ConfigSlot::Bank2Address, self.config.default_bank2_address)?;
            address = store.read_u32(ConfigSlot::Bank2Address)?;
        }
        self.check_bank2_address(address)?;
        Ok(address)
    }

    pub fn check_bank2_address(&self, address: u32) -> Result<(), OtaError> {
        if address == ERASED_WORD || !self.config.is_sector_aligned(address) {
            log::warn!("bank 2 address {:#010x} is not usable", address);
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        Ok(())
    }

    /// One past the last byte bank 1 uses: its image header and image, then
    /// the data header and data that follow.
    pub fn bank1_occupied_end<M: RawMutex, F: NorFlash>(
        &self,
        flash: &SharedFlash<'_, M, F>,
    ) -> Result<u32, OtaError> {
        let invalid = || OtaError::new(OtaErrorKind::InvalidAddress);
        let bank1 = self.config.bank1_address;
        let image_len = flash.read_u32(bank1.checked_add(IMAGE_SIZE_OFFSET).ok_or_else(invalid)?)?;
        let data_header = bank1
            .checked_add(image_len)
            .and_then(|end| end.checked_add(IMAGE_HEADER_LEN))
            .ok_or_else(invalid)?;
        let data_len =
            flash.read_u32(data_header.checked_add(IMAGE_SIZE_OFFSET).ok_or_else(invalid)?)?;
        data_header
            .checked_add(data_len)
            .and_then(|end| end.checked_add(IMAGE_HEADER_LEN))
            .ok_or_else(invalid)
    }

    /// Bank 2 may start exactly where bank 1 ends, never before.
    pub fn check_bank2_clear_of_bank1<M: RawMutex, F: NorFlash>(
        &self,
        flash: &SharedFlash<'_, M, F>,
        bank2: u32,
    ) -> Result<(), OtaError> {
        let bank1_end = self.bank1_occupied_end(flash)?;
        if bank2 < bank1_end {
            log::warn!(
                "bank 2 at {:#010x} overlaps bank 1 ending at {:#010x}",
                bank2,
                bank1_end
            );
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        Ok(())
    }

    /// An image for bank 1 must fit below bank 2.
    pub fn check_fits_bank1(&self, bank2: u32, image_len: u32) -> Result<(), OtaError> {
        let gap = bank2
            .checked_sub(self.config.bank1_address)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        if image_len > gap {
            log::warn!("image of {} bytes does not fit bank 1 ({} bytes)", image_len, gap);
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        Ok(())
    }

    /// Start address of `target`, validated without writing anything
    /// except a missing bank 2 slot.
    pub fn target_address<M: RawMutex, F: NorFlash, C: ConfigStore>(
        &self,
        flash: &SharedFlash<'_, M, F>,
        store: &mut C,
        target: BankIndex,
        image_len: u32,
    ) -> Result<u32, OtaError> {
        let bank2 = self.bank2_address(store)?;
        let address = match target {
            BankIndex::Bank2 => {
                self.check_bank2_clear_of_bank1(flash, bank2)?;
                bank2
            }
            BankIndex::Bank1 => {
                self.check_fits_bank1(bank2, image_len)?;
                self.config.bank1_address
            }
        };
        if address == ERASED_WORD {
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        Ok(address)
    }

    /// Resolves the inactive bank for a container image and checks it
    /// against the address the container was linked for.
    pub fn resolve<M: RawMutex, F: NorFlash, C: ConfigStore>(
        &self,
        flash: &SharedFlash<'_, M, F>,
        store: &mut C,
        running: BankIndex,
        primary: &ImageHeader,
    ) -> Result<u32, OtaError> {
        let target = running.other();
        let address = self.target_address(flash, store, target, primary.image_len)?;
        if address != primary.flash_address {
            log::warn!(
                "{:?} resolves to {:#010x} but image is linked for {:#010x}",
                target,
                address,
                primary.flash_address
            );
            return Err(OtaError::new(OtaErrorKind::InvalidAddress));
        }
        log::info!("target {:?} at {:#010x}", target, address);
        Ok(address)
    }
}
