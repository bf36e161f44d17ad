//! Command Dispatcher
//!
//! Turns a decoded argument list into exactly one handler call and its reply.
//! The command name (first argument) is matched case-insensitively.
//!
//! ## Supported Commands
//!
//! - `PING` - replies `+PONG`
//! - `ECHO message` - replies with `message` as a status
//! - `SET key value [PX milliseconds]` - stores a value, replacing any old entry
//! - `GET key` - returns the stored value or nil
//!
//! Anything else, or a known command with the wrong number of arguments,
//! produces an `-ERR ...` reply and leaves the connection open.

use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Recoverable command failures, sent back as error replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// Dispatches commands against the shared storage engine.
///
/// Cheap to clone; every connection gets its own handle.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes one command and returns the reply to send.
    ///
    /// # Example
    ///
    /// ```
    /// use pulsekv::commands::CommandHandler;
    /// use pulsekv::protocol::RespValue;
    /// use pulsekv::storage::StorageEngine;
    /// use bytes::Bytes;
    /// use std::sync::Arc;
    ///
    /// let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
    /// let reply = handler.execute(vec![Bytes::from("ping")]);
    /// assert_eq!(reply, RespValue::pong());
    /// ```
    pub fn execute(&self, args: Vec<Bytes>) -> RespValue {
        self.dispatch(&args).unwrap_or_else(RespValue::from)
    }

    fn dispatch(&self, args: &[Bytes]) -> CommandResult {
        let (name, args) = args.split_first().ok_or(CommandError::EmptyCommand)?;

        match name.to_ascii_uppercase().as_slice() {
            b"PING" => self.cmd_ping(args),
            b"ECHO" => self.cmd_echo(args),
            b"SET" => self.cmd_set(args),
            b"GET" => self.cmd_get(args),
            _ => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(name).into_owned(),
            )),
        }
    }

    /// PING
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("ping"));
        }
        Ok(RespValue::pong())
    }

    /// ECHO message
    ///
    /// Replies `+<message>`, except that a message containing CR or LF comes
    /// back as a bulk reply `$<len>` with the same bytes.
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        let [message] = args else {
            return Err(CommandError::WrongArity("echo"));
        };

        // A status line cannot carry CR or LF; fall back to the binary-safe form.
        if message.iter().any(|&b| b == b'\r' || b == b'\n') {
            return Ok(RespValue::bulk(message.clone()));
        }
        Ok(RespValue::status(message.clone()))
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let [key, value, options @ ..] = args else {
            return Err(CommandError::WrongArity("set"));
        };

        let ttl_ms = px_millis(options);
        // Arguments are slices of the connection's read buffer; store owned
        // copies so a long-lived entry does not keep that buffer alive.
        self.storage.set(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            ttl_ms,
        );

        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("get"));
        };

        Ok(match self.storage.get(key) {
            Some(entry) => RespValue::bulk(entry.value),
            None => RespValue::null(),
        })
    }
}

/// Finds the first `PX` token and parses the one after it as milliseconds.
///
/// A missing `PX`, a missing value, or a value that is not a non-negative
/// integer all mean "no expiry".
fn px_millis(options: &[Bytes]) -> Option<u64> {
    let pos = options.iter().position(|opt| opt.eq_ignore_ascii_case(b"PX"))?;
    let raw = options.get(pos + 1)?;
    std::str::from_utf8(raw).ok()?.parse().ok()
}
