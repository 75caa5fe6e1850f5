use embedded_io::{ErrorType, Read, Write};
use heapless::Vec;

use crate::error::{OtaError, OtaErrorKind};

const HTTP_SCRATCH_LEN: usize = 64;
/// Longest header line kept for parsing. Longer lines are truncated, which
/// is harmless for every line this reader looks at.
const HTTP_LINE_MAX: usize = 128;
const CONTENT_LENGTH: &[u8] = b"content-length";

/// Response body of an HTTP/1.x download.
///
/// The head is parsed through a small scratch buffer the first time the body
/// is read (or when [`HttpBody::read_head`] is called). Body bytes that
/// arrived together with the head are served first. Reads stop after
/// `Content-Length` bytes.
pub struct HttpBody<S> {
    inner: S,
    content_length: Option<u32>,
    remaining: u32,
    pending: Vec<u8, HTTP_SCRATCH_LEN>,
    pending_pos: usize,
}

#[derive(Clone, Copy)]
enum Line {
    Status,
    Header,
}

impl<S: Read> HttpBody<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            content_length: None,
            remaining: 0,
            pending: Vec::new(),
            pending_pos: 0,
        }
    }

    pub fn content_length(&self) -> Option<u32> {
        self.content_length
    }

    /// Parses the status line and headers, once. Returns the body length.
    pub fn read_head(&mut self) -> Result<u32, OtaError> {
        if let Some(len) = self.content_length {
            return Ok(len);
        }

        let mut scratch = [0u8; HTTP_SCRATCH_LEN];
        let mut line: Vec<u8, HTTP_LINE_MAX> = Vec::new();
        let mut kind = Line::Status;
        let mut length = None;

        loop {
            let count = self.inner.read(&mut scratch).map_err(OtaError::stream)?;
            if count == 0 {
                log::warn!("connection closed inside the response head");
                return Err(OtaError::new(OtaErrorKind::StreamTruncated));
            }
            let received = scratch
                .get(..count)
                .ok_or(OtaError::new(OtaErrorKind::HttpMalformed))?;

            for (index, byte) in received.iter().enumerate() {
                if *byte != b'\n' {
                    // overflow drops the tail of an over-long line
                    let _ = line.push(*byte);
                    continue;
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                match kind {
                    Line::Status => {
                        parse_status(&line)?;
                        kind = Line::Header;
                    }
                    Line::Header if line.is_empty() => {
                        let len = match length {
                            Some(len) if len > 0 => len,
                            _ => {
                                log::warn!("response has no usable Content-Length");
                                return Err(OtaError::new(OtaErrorKind::HttpMissingLength));
                            }
                        };
                        let body = received.get(index.saturating_add(1)..).unwrap_or(&[]);
                        self.start_body(len, body)?;
                        return Ok(len);
                    }
                    Line::Header => {
                        if let Some(len) = parse_content_length(&line)? {
                            length = Some(len);
                        }
                    }
                }
                line.clear();
            }
        }
    }

    fn start_body(&mut self, len: u32, early: &[u8]) -> Result<(), OtaError> {
        log::info!("http body of {} bytes", len);
        self.content_length = Some(len);
        self.remaining = len;
        let keep = early
            .get(..early.len().min(usize::try_from(len).unwrap_or(usize::MAX)))
            .unwrap_or(early);
        self.pending
            .extend_from_slice(keep)
            .map_err(|_| OtaError::new(OtaErrorKind::HttpMalformed))?;
        self.pending_pos = 0;
        Ok(())
    }
}

impl<S> HttpBody<S> {
    /// Copies body bytes that arrived with the head.
    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let Some(pending) = self.pending.get(self.pending_pos..) else {
            return 0;
        };
        let count = pending.len().min(buf.len());
        if let (Some(src), Some(dst)) = (pending.get(..count), buf.get_mut(..count)) {
            dst.copy_from_slice(src);
        }
        self.pending_pos = self.pending_pos.saturating_add(count);
        count
    }
}

fn parse_status(line: &[u8]) -> Result<(), OtaError> {
    let mut parts = line.split(|byte| *byte == b' ').filter(|part| !part.is_empty());
    let version = parts.next().unwrap_or(&[]);
    if !version.starts_with(b"HTTP/1.") {
        return Err(OtaError::new(OtaErrorKind::HttpMalformed));
    }
    let status = parts
        .next()
        .and_then(parse_decimal)
        .and_then(|code| u16::try_from(code).ok())
        .ok_or(OtaError::new(OtaErrorKind::HttpMalformed))?;
    if status != 200 {
        log::warn!("http status {}", status);
        return Err(OtaError::http_status(status));
    }
    Ok(())
}

fn parse_content_length(line: &[u8]) -> Result<Option<u32>, OtaError> {
    let Some(colon) = line.iter().position(|byte| *byte == b':') else {
        return Ok(None);
    };
    let (name, value) = line.split_at(colon);
    if !name.trim_ascii().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.get(1..).unwrap_or(&[]).trim_ascii();
    parse_decimal(value)
        .map(Some)
        .ok_or(OtaError::new(OtaErrorKind::HttpMalformed))
}

fn parse_decimal(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u32, |acc, byte| {
        let digit = byte.checked_sub(b'0').filter(|digit| *digit <= 9)?;
        acc.checked_mul(10)?.checked_add(u32::from(digit))
    })
}

impl<S: Read> ErrorType for HttpBody<S> {
    type Error = OtaError;
}

impl<S: Read> Read for HttpBody<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_head()?;
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let count = match self.take_pending(buf) {
            0 => {
                let limit = usize::try_from(self.remaining)
                    .unwrap_or(usize::MAX)
                    .min(buf.len());
                let dst = buf
                    .get_mut(..limit)
                    .ok_or(OtaError::new(OtaErrorKind::HttpMalformed))?;
                self.inner.read(dst).map_err(OtaError::stream)?
            }
            count => count,
        };

        self.remaining = self
            .remaining
            .saturating_sub(u32::try_from(count).unwrap_or(u32::MAX));
        Ok(count)
    }
}

impl<S: Read + Write> Write for HttpBody<S> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.write(buf).map_err(OtaError::stream)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.inner.flush().map_err(OtaError::stream)
    }
}
