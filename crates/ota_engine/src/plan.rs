use heapless::Vec;
use ota_container::{ImageHeader, ImageTag, SIGNATURE_LEN, TargetHeader};

use crate::bank::BankIndex;
use crate::error::{OtaError, OtaErrorKind};

pub const MAX_PLAN_ENTRIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageRole {
    Primary,
    Secondary,
}

/// One image to pull out of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadEntry {
    pub role: ImageRole,
    pub tag: ImageTag,
    /// Where the first payload byte after the signature goes.
    pub destination: u32,
    pub payload_len: u32,
    pub stream_offset: u32,
    pub signature_len: u32,
    pub expected_checksum: u32,
}

impl DownloadEntry {
    /// First flash byte the entry owns. The signature goes here on commit.
    pub fn region_start(&self) -> Option<u32> {
        self.destination.checked_sub(self.signature_len)
    }

    pub fn region_len(&self) -> Option<u32> {
        self.payload_len.checked_add(self.signature_len)
    }

    pub fn stream_end(&self) -> Option<u32> {
        self.stream_offset.checked_add(self.region_len()?)
    }
}

/// Images of one attempt, ordered by stream offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    entries: Vec<DownloadEntry, MAX_PLAN_ENTRIES>,
    /// Stream position of the first byte after the header block.
    stream_start: u32,
    target_bank: BankIndex,
}

impl DownloadPlan {
    /// Primary at `bank_address`, the optional secondary at
    /// `secondary_address`.
    pub fn for_target(
        target: &TargetHeader,
        target_bank: BankIndex,
        bank_address: u32,
        secondary_address: u32,
    ) -> Result<Self, OtaError> {
        let stream_start = u32::try_from(target.header_block_len()?)
            .map_err(|_| OtaError::new(OtaErrorKind::MalformedHeader))?;
        let primary = Self::primary_entry(&target.primary, bank_address)?;
        let secondary = target
            .secondary
            .map(|header| Self::secondary_entry(&header, secondary_address));

        let mut entries = Vec::new();
        match secondary {
            Some(secondary) if secondary.stream_offset <= primary.stream_offset => {
                push(&mut entries, secondary)?;
                push(&mut entries, primary)?;
            }
            Some(secondary) => {
                push(&mut entries, primary)?;
                push(&mut entries, secondary)?;
            }
            None => push(&mut entries, primary)?,
        }

        let plan = Self {
            entries,
            stream_start,
            target_bank,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// A bare image streamed from position zero with no signature.
    pub fn raw_image(
        target_bank: BankIndex,
        bank_address: u32,
        len: u32,
        checksum: u32,
    ) -> Result<Self, OtaError> {
        let mut entries = Vec::new();
        push(
            &mut entries,
            DownloadEntry {
                role: ImageRole::Primary,
                tag: target_bank.image_tag(),
                destination: bank_address,
                payload_len: len,
                stream_offset: 0,
                signature_len: 0,
                expected_checksum: checksum,
            },
        )?;
        let plan = Self {
            entries,
            stream_start: 0,
            target_bank,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn primary_entry(header: &ImageHeader, bank_address: u32) -> Result<DownloadEntry, OtaError> {
        let signature_len = SIGNATURE_LEN as u32;
        let payload_len = header
            .image_len
            .checked_sub(signature_len)
            .ok_or(OtaError::new(OtaErrorKind::InvalidLayout))?;
        let destination = bank_address
            .checked_add(signature_len)
            .ok_or(OtaError::new(OtaErrorKind::InvalidAddress))?;
        Ok(DownloadEntry {
            role: ImageRole::Primary,
            tag: header.tag,
            destination,
            payload_len,
            stream_offset: header.offset,
            signature_len,
            expected_checksum: header.checksum,
        })
    }

    fn secondary_entry(header: &ImageHeader, address: u32) -> DownloadEntry {
        DownloadEntry {
            role: ImageRole::Secondary,
            tag: header.tag,
            destination: address,
            payload_len: header.image_len,
            stream_offset: header.offset,
            signature_len: 0,
            expected_checksum: header.checksum,
        }
    }

    fn validate(&self) -> Result<(), OtaError> {
        let layout = || OtaError::new(OtaErrorKind::InvalidLayout);
        let mut previous_end = self.stream_start;
        for entry in &self.entries {
            if entry.stream_offset < previous_end {
                log::warn!(
                    "{:?} image at stream offset {} overlaps data ending at {}",
                    entry.role,
                    entry.stream_offset,
                    previous_end
                );
                return Err(layout());
            }
            previous_end = entry.stream_end().ok_or_else(layout)?;
            entry.region_start().ok_or_else(layout)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[DownloadEntry] {
        &self.entries
    }

    pub fn primary(&self) -> Option<&DownloadEntry> {
        self.entries
            .iter()
            .find(|entry| entry.role == ImageRole::Primary)
    }

    pub fn secondary(&self) -> Option<&DownloadEntry> {
        self.entries
            .iter()
            .find(|entry| entry.role == ImageRole::Secondary)
    }

    pub fn stream_start(&self) -> u32 {
        self.stream_start
    }

    pub fn target_bank(&self) -> BankIndex {
        self.target_bank
    }

    /// Start of the target bank, where the signature is written last.
    pub fn bank_address(&self) -> Option<u32> {
        self.primary()?.region_start()
    }
}

fn push(
    entries: &mut Vec<DownloadEntry, MAX_PLAN_ENTRIES>,
    entry: DownloadEntry,
) -> Result<(), OtaError> {
    entries
        .push(entry)
        .map_err(|_| OtaError::new(OtaErrorKind::InvalidLayout))
}
