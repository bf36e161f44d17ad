//! # PulseKV - A Small In-Memory Key-Value Server
//!
//! PulseKV speaks a simplified RESP framing over TCP and supports four
//! commands: `PING`, `ECHO`, `SET key value [PX ms]` and `GET`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              PulseKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (main.rs)   │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │ FrameParser │    │        StorageEngine         │ │
//! │                     │ RespValue   │    │  sharded RwLock<HashMap>     │ │
//! │                     └─────────────┘    └──────────────────────────────┘ │
//! │                                                       ▲                 │
//! │                                        ┌──────────────┴──────────────┐  │
//! │                                        │ ExpirySweeper (optional)    │  │
//! │                                        └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each connection runs on its own tokio task and handles one frame at a
//! time. The `StorageEngine` is the only state shared between connections.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pulsekv::{handle_connection, CommandHandler, ConnectionStats, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame decoding and reply encoding
//! - [`commands`]: the command dispatcher
//! - [`storage`]: the shared store and the expiry sweeper
//! - [`connection`]: the per-client read/execute/reply loop
//! - [`config`]: server settings

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::{CommandError, CommandHandler};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionError, ConnectionStats};
pub use protocol::{FrameParser, FrameProgress, ParseError, RespValue};
pub use storage::{start_expiry_sweeper, Entry, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host: all interfaces
pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
