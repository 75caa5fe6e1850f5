use heapless::Vec;

use crate::{
    Checksum, ContainerError, FILE_HEADER_LEN, FileHeader, IMAGE_HEADER_RECORD_LEN, ImageHeader,
    ImageTag,
};

pub const MAX_IMAGES: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ImageSpec<'a> {
    pub tag: ImageTag,
    pub flash_address: u32,
    pub payload: &'a [u8],
    /// Fixed stream position. `None` places the payload after the previous one.
    pub offset: Option<u32>,
}

/// Packs payloads into a container. Used by host tooling and by tests that
/// need real containers to stream.
#[derive(Debug, Clone)]
pub struct ContainerBuilder<'a> {
    version: u32,
    record_len: u32,
    images: Vec<ImageSpec<'a>, MAX_IMAGES>,
}

impl<'a> ContainerBuilder<'a> {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            record_len: IMAGE_HEADER_RECORD_LEN as u32,
            images: Vec::new(),
        }
    }

    /// Pads every image header record to `record_len` bytes.
    pub fn with_record_len(mut self, record_len: u32) -> Self {
        self.record_len = record_len;
        self
    }

    pub fn push(
        &mut self,
        tag: ImageTag,
        flash_address: u32,
        payload: &'a [u8],
    ) -> Result<&mut Self, ContainerError> {
        self.push_image(ImageSpec {
            tag,
            flash_address,
            payload,
            offset: None,
        })
    }

    pub fn push_at(
        &mut self,
        tag: ImageTag,
        flash_address: u32,
        payload: &'a [u8],
        offset: u32,
    ) -> Result<&mut Self, ContainerError> {
        self.push_image(ImageSpec {
            tag,
            flash_address,
            payload,
            offset: Some(offset),
        })
    }

    fn push_image(&mut self, spec: ImageSpec<'a>) -> Result<&mut Self, ContainerError> {
        self.images
            .push(spec)
            .map_err(|_| ContainerError::TooManyImages)?;
        Ok(self)
    }

    pub fn header_block_len(&self) -> Result<usize, ContainerError> {
        let record_len =
            usize::try_from(self.record_len).map_err(|_| ContainerError::MalformedHeader)?;
        if record_len < IMAGE_HEADER_RECORD_LEN || self.images.is_empty() {
            return Err(ContainerError::MalformedHeader);
        }
        self.images
            .len()
            .checked_mul(record_len)
            .and_then(|records| records.checked_add(FILE_HEADER_LEN))
            .ok_or(ContainerError::MalformedHeader)
    }

    /// Image headers in the order they were pushed, offsets resolved.
    pub fn headers(&self) -> Result<Vec<ImageHeader, MAX_IMAGES>, ContainerError> {
        let header_len =
            u32::try_from(self.header_block_len()?).map_err(|_| ContainerError::MalformedHeader)?;
        let mut next_offset = header_len;
        let mut headers: Vec<ImageHeader, MAX_IMAGES> = Vec::new();
        for spec in &self.images {
            let image_len =
                u32::try_from(spec.payload.len()).map_err(|_| ContainerError::MalformedHeader)?;
            let offset = spec.offset.unwrap_or(next_offset);
            if offset < header_len {
                return Err(ContainerError::OverlappingImages);
            }
            let header = ImageHeader {
                tag: spec.tag,
                header_len: self.record_len,
                checksum: Checksum::of(spec.payload),
                image_len,
                offset,
                flash_address: spec.flash_address,
            };
            let end = header.end_offset().ok_or(ContainerError::MalformedHeader)?;
            for placed in &headers {
                let placed_end = placed.end_offset().ok_or(ContainerError::MalformedHeader)?;
                if offset < placed_end && placed.offset < end {
                    return Err(ContainerError::OverlappingImages);
                }
            }
            next_offset = next_offset.max(end);
            headers
                .push(header)
                .map_err(|_| ContainerError::TooManyImages)?;
        }
        Ok(headers)
    }

    pub fn total_len(&self) -> Result<usize, ContainerError> {
        let header_len = self.header_block_len()?;
        let mut total = header_len;
        for header in self.headers()? {
            let end = header.end_offset().ok_or(ContainerError::MalformedHeader)?;
            total = total.max(usize::try_from(end).map_err(|_| ContainerError::MalformedHeader)?);
        }
        Ok(total)
    }

    /// Writes the container into `out` and returns its length. Gaps between
    /// payloads are zero filled.
    pub fn build_into(&self, out: &mut [u8]) -> Result<usize, ContainerError> {
        let total = self.total_len()?;
        let out = out
            .get_mut(..total)
            .ok_or(ContainerError::OutputTooSmall(total))?;
        out.fill(0);

        let header_count =
            u32::try_from(self.images.len()).map_err(|_| ContainerError::TooManyImages)?;
        FileHeader {
            version: self.version,
            header_count,
        }
        .encode(out)?;

        let record_len =
            usize::try_from(self.record_len).map_err(|_| ContainerError::MalformedHeader)?;
        let records = out
            .get_mut(FILE_HEADER_LEN..)
            .ok_or(ContainerError::OutputTooSmall(total))?;
        for (record, header) in records.chunks_exact_mut(record_len).zip(self.headers()?.iter()) {
            header.encode(record)?;
        }

        for (spec, header) in self.images.iter().zip(self.headers()?.iter()) {
            let start =
                usize::try_from(header.offset).map_err(|_| ContainerError::MalformedHeader)?;
            let end = start
                .checked_add(spec.payload.len())
                .ok_or(ContainerError::MalformedHeader)?;
            out.get_mut(start..end)
                .ok_or(ContainerError::OutputTooSmall(total))?
                .copy_from_slice(spec.payload);
        }
        Ok(total)
    }
}
