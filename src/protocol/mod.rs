//! Wire Protocol
//!
//! A simplified RESP framing. Requests are arrays of bulk strings; replies are
//! status, error, bulk or nil bulk values.
//!
//! - `parser`: decodes request frames into argument lists
//! - `types`: the `RespValue` reply type and its encoder
//!
//! ## Example
//!
//! ```
//! use pulsekv::protocol::{parse_frame, RespValue};
//! use bytes::Bytes;
//!
//! let (args, _) = parse_frame(b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n").unwrap().unwrap();
//! assert_eq!(args[1], Bytes::from("hi"));
//!
//! let reply = RespValue::status(args[1].clone());
//! assert_eq!(reply.encode(), b"+hi\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_frame, FrameParser, FrameProgress, ParseError, ParseResult};
pub use types::RespValue;
