//! Reply types and their wire encoding.
//!
//! Every reply the server sends is one of four shapes:
//!
//! - `+` Status reply: `+OK\r\n`
//! - `-` Error reply: `-ERR unknown command 'FOO'\r\n`
//! - `$` Bulk reply: `$5\r\nhello\r\n`
//! - Nil bulk reply: `$-1\r\n`
//!
//! All lines are terminated with CRLF.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used throughout the protocol
pub const CRLF: &[u8] = b"\r\n";

/// Protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply produced by a command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Short status text. Must not contain CR or LF.
    /// Format: `+<text>\r\n`
    Status(Bytes),

    /// An error condition reported back to the client.
    /// Format: `-<message>\r\n`
    Error(String),

    /// Length-prefixed, binary-safe payload.
    /// Format: `$<length>\r\n<data>\r\n`
    Bulk(Bytes),

    /// Absent value.
    /// Format: `$-1\r\n`
    NullBulk,
}

impl RespValue {
    /// Creates a status reply.
    ///
    /// # Example
    /// ```
    /// use pulsekv::protocol::types::RespValue;
    /// assert_eq!(RespValue::status("OK").encode(), b"+OK\r\n");
    /// ```
    pub fn status(text: impl Into<Bytes>) -> Self {
        RespValue::Status(text.into())
    }

    /// Creates an error reply.
    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    /// Creates a bulk reply.
    ///
    /// # Example
    /// ```
    /// use pulsekv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// assert_eq!(RespValue::bulk(Bytes::from("bar")).encode(), b"$3\r\nbar\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::Bulk(data.into())
    }

    pub fn null() -> Self {
        RespValue::NullBulk
    }

    pub fn ok() -> Self {
        RespValue::Status(Bytes::from_static(b"OK"))
    }

    pub fn pong() -> Self {
        RespValue::Status(Bytes::from_static(b"PONG"))
    }

    /// Encodes the reply into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply, appending to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::Status(text) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(text);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(msg) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(msg.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::NullBulk => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
        }
    }

    /// Upper bound on the number of bytes `encode_into` appends.
    fn encoded_len(&self) -> usize {
        match self {
            RespValue::Status(text) => 1 + text.len() + 2,
            RespValue::Error(msg) => 1 + msg.len() + 2,
            // 20 digits covers any usize
            RespValue::Bulk(data) => 1 + 20 + 2 + data.len() + 2,
            RespValue::NullBulk => 5,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::NullBulk)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::Status(text) => write!(f, "{}", String::from_utf8_lossy(text)),
            RespValue::Error(msg) => write!(f, "(error) {}", msg),
            RespValue::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::NullBulk => write!(f, "(nil)"),
        }
    }
}
