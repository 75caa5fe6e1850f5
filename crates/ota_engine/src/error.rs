use core::fmt;

use embedded_storage::nor_flash::NorFlashErrorKind;
use heapless::String;
use ota_container::ContainerError;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub const ERROR_LOCATION_FILE_MAX: usize = 96;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    pub file: String<ERROR_LOCATION_FILE_MAX>,
    pub line: u32,
    pub column: u32,
}

impl ErrorLocation {
    #[track_caller]
    pub fn capture() -> Self {
        let loc = core::panic::Location::caller();
        Self::from_parts(loc.file(), loc.line(), loc.column())
    }

    pub fn from_parts(file: &str, line: u32, column: u32) -> Self {
        let mut file_name = String::new();
        for ch in file.chars() {
            if file_name.push(ch).is_err() {
                break;
            }
        }
        Self {
            file: file_name,
            line,
            column,
        }
    }
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaErrorKind {
    StreamRead,
    StreamTruncated,
    HeaderIncomplete,
    NoMatchingImage,
    InvalidAddress,
    StorageFault,
    ChecksumMismatch,
    MalformedHeader,
    HeaderTooLarge,
    InvalidLayout,
    HttpStatus,
    HttpMissingLength,
    HttpMalformed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    #[error("stream read failed at {location}")]
    StreamRead {
        io: Option<embedded_io::ErrorKind>,
        location: ErrorLocation,
    },
    #[error("stream closed early at {location}")]
    StreamTruncated { location: ErrorLocation },
    #[error("header incomplete at {location}")]
    HeaderIncomplete { location: ErrorLocation },
    #[error("no matching image at {location}")]
    NoMatchingImage { location: ErrorLocation },
    #[error("invalid bank address at {location}")]
    InvalidAddress { location: ErrorLocation },
    #[error("storage fault at {location}")]
    StorageFault {
        flash: Option<NorFlashErrorKind>,
        location: ErrorLocation,
    },
    #[error("checksum mismatch at {location}")]
    ChecksumMismatch { location: ErrorLocation },
    #[error("malformed header at {location}")]
    MalformedHeader { location: ErrorLocation },
    #[error("header too large at {location}")]
    HeaderTooLarge { location: ErrorLocation },
    #[error("invalid image layout at {location}")]
    InvalidLayout { location: ErrorLocation },
    #[error("http status {status} at {location}")]
    HttpStatus { status: u16, location: ErrorLocation },
    #[error("http response without content length at {location}")]
    HttpMissingLength { location: ErrorLocation },
    #[error("malformed http response at {location}")]
    HttpMalformed { location: ErrorLocation },
}

impl OtaError {
    #[track_caller]
    pub fn new(kind: OtaErrorKind) -> Self {
        let location = ErrorLocation::capture();
        match kind {
            OtaErrorKind::StreamRead => OtaError::StreamRead { io: None, location },
            OtaErrorKind::StreamTruncated => OtaError::StreamTruncated { location },
            OtaErrorKind::HeaderIncomplete => OtaError::HeaderIncomplete { location },
            OtaErrorKind::NoMatchingImage => OtaError::NoMatchingImage { location },
            OtaErrorKind::InvalidAddress => OtaError::InvalidAddress { location },
            OtaErrorKind::StorageFault => OtaError::StorageFault {
                flash: None,
                location,
            },
            OtaErrorKind::ChecksumMismatch => OtaError::ChecksumMismatch { location },
            OtaErrorKind::MalformedHeader => OtaError::MalformedHeader { location },
            OtaErrorKind::HeaderTooLarge => OtaError::HeaderTooLarge { location },
            OtaErrorKind::InvalidLayout => OtaError::InvalidLayout { location },
            OtaErrorKind::HttpStatus => OtaError::HttpStatus {
                status: 0,
                location,
            },
            OtaErrorKind::HttpMissingLength => OtaError::HttpMissingLength { location },
            OtaErrorKind::HttpMalformed => OtaError::HttpMalformed { location },
        }
    }

    #[track_caller]
    pub fn flash(kind: NorFlashErrorKind) -> Self {
        OtaError::StorageFault {
            flash: Some(kind),
            location: ErrorLocation::capture(),
        }
    }

    #[track_caller]
    pub fn stream<E: embedded_io::Error>(err: E) -> Self {
        OtaError::StreamRead {
            io: Some(err.kind()),
            location: ErrorLocation::capture(),
        }
    }

    #[track_caller]
    pub fn http_status(status: u16) -> Self {
        OtaError::HttpStatus {
            status,
            location: ErrorLocation::capture(),
        }
    }

    pub fn kind(&self) -> OtaErrorKind {
        match self {
            OtaError::StreamRead { .. } => OtaErrorKind::StreamRead,
            OtaError::StreamTruncated { .. } => OtaErrorKind::StreamTruncated,
            OtaError::HeaderIncomplete { .. } => OtaErrorKind::HeaderIncomplete,
            OtaError::NoMatchingImage { .. } => OtaErrorKind::NoMatchingImage,
            OtaError::InvalidAddress { .. } => OtaErrorKind::InvalidAddress,
            OtaError::StorageFault { .. } => OtaErrorKind::StorageFault,
            OtaError::ChecksumMismatch { .. } => OtaErrorKind::ChecksumMismatch,
            OtaError::MalformedHeader { .. } => OtaErrorKind::MalformedHeader,
            OtaError::HeaderTooLarge { .. } => OtaErrorKind::HeaderTooLarge,
            OtaError::InvalidLayout { .. } => OtaErrorKind::InvalidLayout,
            OtaError::HttpStatus { .. } => OtaErrorKind::HttpStatus,
            OtaError::HttpMissingLength { .. } => OtaErrorKind::HttpMissingLength,
            OtaError::HttpMalformed { .. } => OtaErrorKind::HttpMalformed,
        }
    }

    pub fn location(&self) -> &ErrorLocation {
        match self {
            OtaError::StreamRead { location, .. }
            | OtaError::StreamTruncated { location }
            | OtaError::HeaderIncomplete { location }
            | OtaError::NoMatchingImage { location }
            | OtaError::InvalidAddress { location }
            | OtaError::StorageFault { location, .. }
            | OtaError::ChecksumMismatch { location }
            | OtaError::MalformedHeader { location }
            | OtaError::HeaderTooLarge { location }
            | OtaError::InvalidLayout { location }
            | OtaError::HttpStatus { location, .. }
            | OtaError::HttpMissingLength { location }
            | OtaError::HttpMalformed { location } => location,
        }
    }
}

impl From<ContainerError> for OtaError {
    #[track_caller]
    fn from(err: ContainerError) -> Self {
        let kind = match err {
            ContainerError::HeaderIncomplete { .. } => OtaErrorKind::HeaderIncomplete,
            ContainerError::NoMatchingImage => OtaErrorKind::NoMatchingImage,
            ContainerError::HeaderTooLarge { .. } => OtaErrorKind::HeaderTooLarge,
            ContainerError::OverlappingImages => OtaErrorKind::InvalidLayout,
            ContainerError::MalformedHeader
            | ContainerError::OutputTooSmall(_)
            | ContainerError::TooManyImages => OtaErrorKind::MalformedHeader,
        };
        OtaError::new(kind)
    }
}

impl embedded_io::Error for OtaError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            OtaError::StreamRead { io: Some(kind), .. } => *kind,
            OtaError::StreamTruncated { .. } => embedded_io::ErrorKind::BrokenPipe,
            OtaError::HttpStatus { .. }
            | OtaError::HttpMissingLength { .. }
            | OtaError::HttpMalformed { .. } => embedded_io::ErrorKind::InvalidData,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

pub(crate) fn map_flash_error<E: embedded_storage::nor_flash::NorFlashError>(err: E) -> OtaError {
    OtaError::flash(err.kind())
}
