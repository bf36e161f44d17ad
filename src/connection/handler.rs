//! Per-Connection Handler
//!
//! Each accepted client gets its own `ConnectionHandler`, running on its own
//! tokio task. The handler owns the read buffer and drives the loop:
//!
//! ```text
//! 1. Read bytes into the buffer
//!        │
//!        ▼
//! 2. Decode one frame ──(incomplete)──> back to 1
//!        │
//!        ▼
//! 3. Execute it against the shared store
//!        │
//!        ▼
//! 4. Encode the reply, write, flush ──> back to 2
//! ```
//!
//! Frames are handled strictly one at a time: a reply is flushed before the
//! next frame is decoded. The loop ends when the client closes the stream, a
//! protocol violation is seen (no reply is sent) or a write fails. Any of
//! these only affects this connection.
//!
//! ## Buffer Management
//!
//! TCP is a stream: a read can deliver part of a frame or several frames. Bytes
//! accumulate in a `BytesMut` and are split off as complete frames are decoded.
//! While a frame is incomplete, a `FrameProgress` remembers how far it has been
//! scanned, so a frame trickling in over many reads is still scanned once.

use crate::commands::CommandHandler;
use crate::protocol::{FrameParser, FrameProgress, ParseError};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by all connections
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not a valid frame
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The client closed the stream between frames
    #[error("client disconnected")]
    ClientDisconnected,

    /// The client closed the stream in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Serves one client over any bidirectional byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: FrameParser,

    /// Scan position within the frame at the front of `buffer`
    progress: FrameProgress,
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: FrameParser::new(),
            progress: FrameProgress::default(),
            stats,
        }
    }

    /// Runs the connection until the client leaves or something goes wrong.
    ///
    /// A clean close between frames returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = match self.main_loop().await {
            Err(ConnectionError::ClientDisconnected) => Ok(()),
            other => other,
        };

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::UnexpectedEof) => {
                debug!(client = %self.addr, "Client disconnected mid-frame")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Closing connection"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(args) = self.try_parse_frame()? {
                let response = self.command_handler.execute(args);
                self.stats.command_processed();
                self.send_response(&response.encode()).await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Splits one complete frame off the front of the buffer, if there is one.
    fn try_parse_frame(&mut self) -> Result<Option<Vec<Bytes>>, ConnectionError> {
        let Some(consumed) = self.parser.check(&self.buffer, &mut self.progress)? else {
            return Ok(None);
        };

        let frame = self.buffer.split_to(consumed).freeze();
        let args = self.parser.decode(frame)?;
        trace!(
            client = %self.addr,
            args = args.len(),
            consumed,
            remaining = self.buffer.len(),
            "Parsed frame"
        );
        Ok(Some(args))
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.parser.max_frame_size() {
            warn!(client = %self.addr, size = self.buffer.len(), "Buffer size limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn send_response(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion, logging how it ended.
///
/// Intended to be passed straight to `tokio::spawn`; errors never leave the
/// task.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn mock_handler(mock: tokio_test::io::Mock) -> ConnectionHandler<tokio_test::io::Mock> {
        let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
        ConnectionHandler::new(mock, test_addr(), handler, Arc::new(ConnectionStats::new()))
    }

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    /// Sends one request and reads until `expected.len()` bytes arrive.
    async fn roundtrip(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).await.unwrap();

        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();

        assert_eq!(buf, expected);
    }

    /// Encodes a request frame.
    fn request(args: &[&[u8]]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Reads one bulk or nil reply.
    async fn read_bulk<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
        let mut header = String::new();
        reader.read_line(&mut header).await.unwrap();
        let len: i64 = header
            .trim_end()
            .strip_prefix('$')
            .expect("expected a bulk reply")
            .parse()
            .unwrap();
        if len < 0 {
            return None;
        }

        let mut payload = vec![0u8; len as usize + 2];
        reader.read_exact(&mut payload).await.unwrap();
        payload.truncate(len as usize);
        Some(payload)
    }

    #[tokio::test]
    async fn test_mock_ping() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        assert!(mock_handler(mock).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$5\r\nhel")
            .read(b"lo\r\n")
            .write(b"+hello\r\n")
            .build();

        assert!(mock_handler(mock).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_large_frame_dripped_in_small_reads() {
        const ARGS: usize = 100_000;

        let mut frame = format!("*{}\r\n$4\r\nECHO\r\n", ARGS + 1).into_bytes();
        for _ in 0..ARGS {
            frame.extend_from_slice(b"$1\r\nx\r\n");
        }

        let mut builder = Builder::new();
        for chunk in frame.chunks(64) {
            builder.read(chunk);
        }
        let mock = builder
            .write(b"-ERR wrong number of arguments for 'echo' command\r\n")
            .build();

        // Scanning resumes across reads, so the frame costs one pass.
        let started = Instant::now();
        assert!(mock_handler(mock).run().await.is_ok());
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_mock_frames_in_one_read_get_separate_replies() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .write(b"+OK\r\n")
            .write(b"$3\r\nbar\r\n")
            .build();

        assert!(mock_handler(mock).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_command_error_keeps_connection_open() {
        let mock = Builder::new()
            .read(b"*1\r\n$5\r\nHELLO\r\n")
            .write(b"-ERR unknown command 'HELLO'\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        assert!(mock_handler(mock).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_bad_marker_closes_without_reply() {
        let mock = Builder::new().read(b"PING\r\n").build();

        let result = mock_handler(mock).run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ParseError::UnexpectedMarker(b'P')))
        ));
    }

    #[tokio::test]
    async fn test_mock_bad_count_closes_without_reply() {
        let mock = Builder::new().read(b"*x\r\n").build();

        let result = mock_handler(mock).run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Protocol(ParseError::InvalidArrayLength(_)))
        ));
    }

    #[tokio::test]
    async fn test_mock_eof_mid_frame() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let result = mock_handler(mock).run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_mock_write_failure_ends_connection() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let result = mock_handler(mock).run().await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, storage, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$3\r\nbar\r\n").await;

        assert_eq!(storage.get(b"foo").unwrap().value, Bytes::from("bar"));
    }

    #[tokio::test]
    async fn test_writes_visible_across_connections() {
        let (addr, _, _) = create_test_server().await;
        let mut writer = TcpStream::connect(addr).await.unwrap();
        let mut reader = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut reader, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
        roundtrip(
            &mut writer,
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nvalue\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(&mut reader, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$5\r\nvalue\r\n").await;
    }

    #[tokio::test]
    async fn test_set_px_over_the_wire() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(
            &mut client,
            b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nPX\r\n$2\r\n50\r\n",
            b"+OK\r\n",
        )
        .await;
        roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$3\r\nbar\r\n").await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n", b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_protocol_error_only_closes_offending_connection() {
        let (addr, _, stats) = create_test_server().await;

        let mut bystander = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut bystander, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"GARBAGE\r\n").await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), bad.read(&mut buf))
            .await
            .expect("server should close the connection");
        assert!(matches!(read, Ok(0) | Err(_)));

        // Existing and fresh connections are unaffected
        roundtrip(&mut bystander, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
        let mut fresh = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut fresh, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        assert!(stats.connections_accepted.load(Ordering::Relaxed) >= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_get_over_connections_never_torn() {
        const KEYS: usize = 4;
        const ROUNDS: usize = 200;

        let (addr, storage, _) = create_test_server().await;
        let short = vec![b'a'; 64];
        let long = vec![b'b'; 128];

        let mut tasks = Vec::new();
        for k in 0..KEYS {
            let key = format!("key-{}", k).into_bytes();

            // Two writers per key race whole values of different shapes;
            // only the long one carries a TTL.
            let sets = [
                request(&[&b"SET"[..], key.as_slice(), short.as_slice()]),
                request(&[
                    &b"SET"[..],
                    key.as_slice(),
                    long.as_slice(),
                    &b"PX"[..],
                    &b"3600000"[..],
                ]),
            ];
            for set in sets {
                tasks.push(tokio::spawn(async move {
                    let mut client = TcpStream::connect(addr).await.unwrap();
                    for _ in 0..ROUNDS {
                        roundtrip(&mut client, &set, b"+OK\r\n").await;
                    }
                }));
            }

            let get = request(&[&b"GET"[..], key.as_slice()]);
            let (short, long) = (short.clone(), long.clone());
            tasks.push(tokio::spawn(async move {
                let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
                for _ in 0..ROUNDS {
                    client.get_mut().write_all(&get).await.unwrap();
                    if let Some(value) = read_bulk(&mut client).await {
                        assert!(
                            value == short || value == long,
                            "torn value of {} bytes",
                            value.len()
                        );
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        for k in 0..KEYS {
            let entry = storage.get(format!("key-{}", k).as_bytes()).unwrap();
            assert_eq!(entry.value.len() == 128, entry.expires_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
