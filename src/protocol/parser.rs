//! Command Frame Parser
//!
//! Decodes client requests. A request is always an array of bulk strings:
//!
//! ```text
//! *<N>\r\n
//! $<len_1>\r\n<arg_1>\r\n
//! ...
//! $<len_N>\r\n<arg_N>\r\n
//! ```
//!
//! The parser works on a byte buffer and returns either:
//! - `Ok(Some((args, consumed)))` - a complete frame, `consumed` bytes were used
//! - `Ok(None)` - the frame is incomplete, read more data and retry
//! - `Err(ParseError)` - the stream is desynchronized and cannot be recovered
//!
//! Decoding is split in two steps. [`FrameParser::check`] walks the headers
//! to find where the frame ends without allocating or copying anything, and
//! records how far it got in a [`FrameProgress`] so the next read resumes
//! there. Once the frame is complete, [`FrameParser::decode`] slices the
//! arguments out of it.
//!
//! A declared bulk length is trusted: exactly `len` payload bytes are taken and
//! the two terminator bytes that follow are skipped without being inspected.
//! Lengths and counts are plain decimal digits; signs are rejected.

use crate::protocol::types::prefix;
use bytes::Bytes;
use thiserror::Error;

/// Protocol violations. Any of these is fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The frame did not start with the array marker
    #[error("expected '*', got {0:#04x}")]
    UnexpectedMarker(u8),

    /// An array element did not start with the bulk marker
    #[error("expected '$' for array element, got {0:#04x}")]
    UnexpectedElementMarker(u8),

    /// The element count is not a non-negative integer
    #[error("invalid array length: {0:?}")]
    InvalidArrayLength(String),

    /// The bulk length is not a non-negative integer
    #[error("invalid bulk length: {0:?}")]
    InvalidBulkLength(String),

    /// The frame declares more elements than allowed
    #[error("too many elements: {count} (max: {max})")]
    TooManyElements { count: usize, max: usize },

    /// A single bulk element exceeds the size limit
    #[error("bulk too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// `decode` was given fewer bytes than the frame declares
    #[error("frame is truncated")]
    Truncated,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk element (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one frame
pub const MAX_ELEMENTS: usize = 1024 * 1024;

/// A length header longer than this without a CRLF cannot be valid.
const MAX_HEADER_LEN: usize = 32;

/// Argument vectors start at most this large; the declared count is untrusted.
const ARGS_PREALLOC: usize = 64;

/// How much of a partially received frame [`FrameParser::check`] has already
/// accepted.
///
/// Keep one per stream and pass it to every `check` call on the same buffer.
/// It resets itself when a frame completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameProgress {
    count: Option<usize>,
    elements: usize,
    offset: usize,
}

impl FrameProgress {
    /// Number of elements fully received so far.
    pub fn elements_checked(&self) -> usize {
        self.elements
    }

    /// Bytes from the start of the frame that will not be scanned again.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Decodes command frames into their argument lists.
///
/// # Example
///
/// ```
/// use pulsekv::protocol::FrameParser;
///
/// let parser = FrameParser::new();
/// let (args, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(args, vec!["GET", "foo"]);
/// assert_eq!(consumed, 22);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    max_bulk_size: usize,
    max_elements: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default size limits.
    pub fn new() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
            max_elements: MAX_ELEMENTS,
        }
    }

    /// Creates a parser with custom size limits.
    pub fn with_limits(max_bulk_size: usize, max_elements: usize) -> Self {
        Self {
            max_bulk_size,
            max_elements,
        }
    }

    /// Upper bound on buffered bytes for one frame: room for a maximal key
    /// and value plus headers.
    pub fn max_frame_size(&self) -> usize {
        self.max_bulk_size.saturating_mul(2).saturating_add(64 * 1024)
    }

    /// Attempts to decode one complete frame from the front of `buf`.
    ///
    /// Convenience for one-shot callers; the payloads are copied out of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        let Some(len) = self.check(buf, &mut FrameProgress::default())? else {
            return Ok(None);
        };
        let args = self.decode(Bytes::copy_from_slice(&buf[..len]))?;
        Ok(Some((args, len)))
    }

    /// Finds the end of the frame at the front of `buf`.
    ///
    /// Returns the frame length once every element has arrived. Scanning
    /// starts where `progress` left off, so `buf` must be the same stream
    /// buffer, only grown at the back, since the last call.
    pub fn check(&self, buf: &[u8], progress: &mut FrameProgress) -> ParseResult<Option<usize>> {
        let count = match progress.count {
            Some(count) => count,
            None => {
                let Some((count, header)) = self.array_header(buf)? else {
                    return Ok(None);
                };
                progress.count = Some(count);
                progress.offset = header;
                count
            }
        };

        while progress.elements < count {
            let rest = buf.get(progress.offset..).unwrap_or_default();
            let Some((data_start, len)) = self.bulk_bounds(rest)? else {
                return Ok(None);
            };
            progress.offset += data_start + len + 2;
            progress.elements += 1;
        }

        let len = progress.offset;
        *progress = FrameProgress::default();
        Ok(Some(len))
    }

    /// Splits a complete frame into its arguments.
    ///
    /// Each argument is a slice of `frame`; no payload bytes are copied.
    pub fn decode(&self, frame: Bytes) -> ParseResult<Vec<Bytes>> {
        let (count, mut pos) = self.array_header(&frame)?.ok_or(ParseError::Truncated)?;

        let mut args = Vec::with_capacity(count.min(ARGS_PREALLOC));
        for _ in 0..count {
            let (data_start, len) = self
                .bulk_bounds(&frame[pos..])?
                .ok_or(ParseError::Truncated)?;
            let start = pos + data_start;
            args.push(frame.slice(start..start + len));
            pos = start + len + 2;
        }

        Ok(args)
    }

    /// Reads `*<count>\r\n`, returning the count and the header length.
    fn array_header(&self, buf: &[u8]) -> ParseResult<Option<(usize, usize)>> {
        let Some(&marker) = buf.first() else {
            return Ok(None);
        };
        if marker != prefix::ARRAY {
            return Err(ParseError::UnexpectedMarker(marker));
        }

        let Some((count, header)) = read_length(buf, ParseError::InvalidArrayLength)? else {
            return Ok(None);
        };

        if count > self.max_elements {
            return Err(ParseError::TooManyElements {
                count,
                max: self.max_elements,
            });
        }

        Ok(Some((count, header)))
    }

    /// Locates `$<len>\r\n<data>\r\n`, returning the payload offset and length
    /// once the whole element is in `buf`.
    fn bulk_bounds(&self, buf: &[u8]) -> ParseResult<Option<(usize, usize)>> {
        let Some(&marker) = buf.first() else {
            return Ok(None);
        };
        if marker != prefix::BULK {
            return Err(ParseError::UnexpectedElementMarker(marker));
        }

        let Some((len, data_start)) = read_length(buf, ParseError::InvalidBulkLength)? else {
            return Ok(None);
        };

        if len > self.max_bulk_size {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: self.max_bulk_size,
            });
        }

        if buf.len() < data_start + len + 2 {
            return Ok(None);
        }

        Ok(Some((data_start, len)))
    }
}

/// Reads the decimal length following a one-byte marker.
///
/// Returns the length and the offset just past its CRLF.
fn read_length(
    buf: &[u8],
    invalid: fn(String) -> ParseError,
) -> ParseResult<Option<(usize, usize)>> {
    let line = &buf[1..];
    let end = match find_crlf(line) {
        Some(pos) => pos,
        None if line.len() > MAX_HEADER_LEN => {
            let shown = String::from_utf8_lossy(&line[..MAX_HEADER_LEN]).into_owned();
            return Err(invalid(shown));
        }
        None => return Ok(None),
    };

    let digits = &line[..end];
    let shown = || invalid(String::from_utf8_lossy(digits).into_owned());
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(shown());
    }
    let len = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(shown)?;

    Ok(Some((len, 1 + end + 2)))
}

/// Finds the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decodes one frame with the default limits.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    FrameParser::new().parse(buf)
}
