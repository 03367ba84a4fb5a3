//! Client Session Module
//!
//! This module holds the per-connection state tracked by the server loop and
//! the reader task that turns socket bytes into messages.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. Server accepts a connection
//!        │
//!        ▼
//! 2. Session::spawn splits the stream
//!        │                  │
//!        │ write half       │ read half
//!        ▼                  ▼
//! 3. kept in the      reader task: read ─> frame ─> SessionEvent::Message
//!    active set             │
//!        │                  │ EOF / error
//!        ▼                  ▼
//! 4. BYE, EOF or error: the server drops the Session, which aborts the
//!    reader task and closes the socket
//! ```
//!
//! ## Framing
//!
//! TCP is a stream protocol, so a single read may carry half a command or
//! several of them. [`Framing::Lines`] buffers bytes and yields one message per
//! `\n`. When an unterminated command has been sitting in the buffer for
//! [`UNTERMINATED_FLUSH_DELAY`] without more bytes arriving, it is handed out
//! as it is, so a client that writes `GET key` without a newline and waits
//! for the answer still gets one. [`Framing::SingleRead`] treats every read
//! as exactly one message.

use crate::protocol::Response;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Size of a single bounded read from a socket
pub const READ_BUF_SIZE: usize = 256;

/// Longest unterminated line buffered in [`Framing::Lines`] mode
pub const MAX_LINE_LEN: usize = 1024;

/// How long a partial line waits for the rest before it is taken as a command
pub const UNTERMINATED_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 512;

/// Identifier of a session inside the server's active set.
pub type SessionId = u64;

/// How incoming bytes are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One message per `\n`-terminated line
    #[default]
    Lines,
    /// One message per successful read
    SingleRead,
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
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
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that can occur while serving a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A line grew past the buffering limit without a terminator
    #[error("line too long: {len} bytes buffered (max: {max})")]
    LineTooLong { len: usize, max: usize },
}

/// Something a reader task observed on its socket.
#[derive(Debug)]
pub enum SessionEventKind {
    /// A complete message
    Message(Bytes),
    /// The peer closed the connection
    Closed,
    /// Reading failed
    Failed(ConnectionError),
}

/// An event sent from a reader task to the server loop.
#[derive(Debug)]
pub struct SessionEvent {
    pub id: SessionId,
    pub kind: SessionEventKind,
}

/// Reads messages from one side of a connection.
#[derive(Debug)]
pub struct SessionReader<R> {
    reader: R,
    framing: Framing,
    buffer: BytesMut,
    eof: bool,
    stats: Arc<ConnectionStats>,
}

impl<R: AsyncRead + Unpin> SessionReader<R> {
    pub fn new(reader: R, framing: Framing, stats: Arc<ConnectionStats>) -> Self {
        Self {
            reader,
            framing,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            eof: false,
            stats,
        }
    }

    /// Returns the next message, or `None` once the peer has closed the
    /// connection and everything buffered has been handed out.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            if let Some(message) = self.take_buffered()? {
                return Ok(Some(message));
            }

            if self.eof {
                return Ok(None);
            }

            let mut chunk = [0u8; READ_BUF_SIZE];
            let n = if self.buffer.is_empty() {
                self.reader.read(&mut chunk).await?
            } else {
                // only an unterminated line can be left over here
                match tokio::time::timeout(UNTERMINATED_FLUSH_DELAY, self.reader.read(&mut chunk))
                    .await
                {
                    Ok(read) => read?,
                    Err(_) => {
                        trace!(bytes = self.buffer.len(), "Flushing unterminated line");
                        return Ok(Some(self.buffer.split().freeze()));
                    }
                }
            };

            if n == 0 {
                self.eof = true;
                // an unterminated last line is still a command
                if !self.buffer.is_empty() {
                    return Ok(Some(self.buffer.split().freeze()));
                }
                return Ok(None);
            }

            self.stats.bytes_read(n);
            self.buffer.extend_from_slice(&chunk[..n]);

            if self.framing == Framing::SingleRead {
                return Ok(Some(self.buffer.split().freeze()));
            }
        }
    }

    /// Splits one complete line off the buffer.
    fn take_buffered(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        if self.framing == Framing::SingleRead {
            return Ok(None);
        }

        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => Ok(Some(self.buffer.split_to(pos + 1).freeze())),
            None if self.buffer.len() > MAX_LINE_LEN => Err(ConnectionError::LineTooLong {
                len: self.buffer.len(),
                max: MAX_LINE_LEN,
            }),
            None => Ok(None),
        }
    }
}

/// Reads messages until the peer goes away and forwards them to the server.
///
/// Stops early if the server has dropped its receiver.
pub async fn read_loop<R: AsyncRead + Unpin>(
    id: SessionId,
    mut reader: SessionReader<R>,
    events: mpsc::Sender<SessionEvent>,
) {
    loop {
        let kind = match reader.next_message().await {
            Ok(Some(message)) => SessionEventKind::Message(message),
            Ok(None) => SessionEventKind::Closed,
            Err(e) => SessionEventKind::Failed(e),
        };
        let last = !matches!(kind, SessionEventKind::Message(_));

        if events.send(SessionEvent { id, kind }).await.is_err() {
            trace!(session = id, "Server gone, reader stopping");
            return;
        }

        if last {
            return;
        }
    }
}

/// A connected client, as held in the server's active set.
///
/// Dropping a session stops its reader task and closes the connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,

    /// Client's address (for logging)
    peer: SocketAddr,

    /// Write half of the TCP stream
    writer: BufWriter<OwnedWriteHalf>,

    /// Task reading the other half
    reader: JoinHandle<()>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl Session {
    /// Splits an accepted stream and starts its reader task.
    pub fn spawn(
        id: SessionId,
        stream: TcpStream,
        peer: SocketAddr,
        framing: Framing,
        events: mpsc::Sender<SessionEvent>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = stream.into_split();
        let reader = SessionReader::new(read_half, framing, Arc::clone(&stats));
        let reader = tokio::spawn(read_loop(id, reader, events));

        Self {
            id,
            peer,
            writer: BufWriter::new(write_half),
            reader,
            stats,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends a response line to the client.
    pub async fn send(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            peer = %self.peer,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.stats.connection_closed();
        debug!(session = self.id, peer = %self.peer, "Session dropped");
    }
}
