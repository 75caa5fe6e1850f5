use serde::{Deserialize, Serialize};

pub const SECTOR_SIZE: u32 = 4096;
/// Value of a never-written configuration word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;
/// Size of the header that leads every image already in flash.
pub const IMAGE_HEADER_LEN: u32 = 0x20;
/// Offset of the size field inside [`IMAGE_HEADER_LEN`].
pub const IMAGE_SIZE_OFFSET: u32 = 8;

pub const DEFAULT_FLASH_BASE: u32 = 0x0800_0000;
pub const DEFAULT_BANK1_ADDRESS: u32 = 0x0800_B000;
pub const DEFAULT_BANK2_ADDRESS: u32 = 0x0808_0000;
pub const DEFAULT_SECONDARY_ADDRESS: u32 = 0x0800_4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowKind {
    /// Multi-image container, signature stripped and written last.
    SingleImage,
    /// Raw image preceded by a one byte handshake and a file info record.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaConfig {
    /// Absolute address of flash offset zero.
    pub flash_base: u32,
    pub bank1_address: u32,
    /// Written to the bank 2 slot when it has never been set.
    pub default_bank2_address: u32,
    pub secondary_address: u32,
    pub flow: FlowKind,
    /// Expect the 12 byte file info record in front of a container.
    pub expect_file_info: bool,
}

impl OtaConfig {
    pub const fn new() -> Self {
        Self {
            flash_base: DEFAULT_FLASH_BASE,
            bank1_address: DEFAULT_BANK1_ADDRESS,
            default_bank2_address: DEFAULT_BANK2_ADDRESS,
            secondary_address: DEFAULT_SECONDARY_ADDRESS,
            flow: FlowKind::SingleImage,
            expect_file_info: false,
        }
    }

    pub const fn with_flow(mut self, flow: FlowKind) -> Self {
        self.flow = flow;
        self
    }

    pub fn is_sector_aligned(&self, address: u32) -> bool {
        address.checked_rem(SECTOR_SIZE) == Some(0)
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self::new()
    }
}
