//! # hpx-ws-engine
//!
//! RFC 6455 WebSocket connection engine over any pair of tokio byte streams.
//!
//! The engine starts where the HTTP upgrade ends: it is handed an inbound
//! [`AsyncRead`](tokio::io::AsyncRead) and an outbound
//! [`AsyncWrite`](tokio::io::AsyncWrite) and speaks frames on them. It parses
//! and validates incoming frames, answers pings, completes the close
//! handshake, validates text incrementally across fragments and keeps the
//! connection alive with periodic pings. Outgoing frames from any number of
//! tasks are serialized so their bytes never interleave on the wire.
//!
//! The handshake, TLS and compression extensions are left to the caller.
//!
//! # Example
//! ```rust,no_run
//! use hpx_ws_engine::{CloseResult, Connection, ConnectionOptions, Frame};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(stream: tokio::net::TcpStream) -> hpx_ws_engine::Result<()> {
//! let (reader, writer) = stream.into_split();
//! let conn = Connection::new(reader, writer, None, ConnectionOptions::default());
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Frame>();
//! let cancel = CancellationToken::new();
//! let receive = tokio::spawn(conn.execute(tx, cancel.clone())?);
//!
//! conn.send(Frame::text("hello"), &cancel).await?;
//! if let Some(frame) = rx.recv().await {
//!     println!("received {:?}", frame.opcode());
//! }
//!
//! conn.close(CloseResult::normal(), &cancel).await?;
//! let result = receive.await.expect("receive loop");
//! println!("closed: {result}");
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol Handling
//!
//! - **Ping frames**: answered with a pong carrying the same payload. Handed to
//!   the handler only when [`ConnectionOptions::with_pass_all_frames_through`]
//!   is set.
//! - **Pong frames**: handed to the handler only with pass-through.
//! - **Close frames**: validated, echoed when the peer initiated the close,
//!   and returned as the receive loop's [`CloseResult`].
//! - **Protocol violations**: answered with a close frame carrying the matching
//!   status code, and returned as the receive loop's [`CloseResult`]. The
//!   handler never sees an invalid frame.

pub mod close;
pub mod codec;
mod connection;
pub mod frame;
pub mod mask;
mod options;
mod pinger;
pub mod utf8;

use thiserror::Error;

pub use crate::{
    close::{CloseCode, CloseResult},
    connection::{Connection, ConnectionState, FrameHandler},
    frame::{Frame, OpCode},
    options::{ConnectionOptions, MAX_FRAME_SIZE, MaskGenerator, Masking},
};

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Reserved bits in frame header are not zero.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Invalid frame opcode.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Frame payload exceeds the configured maximum or the address space.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The connection has not been started with `execute`.
    #[error("Connection has not been started")]
    NotStarted,

    /// `execute` was already called on this connection.
    #[error("Connection has already been started")]
    AlreadyStarted,

    /// Connection has been closed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// This side has already sent a close frame.
    #[error("Close frame already sent")]
    CloseSent,

    /// Close frames go through `Connection::close`.
    #[error("Close frames must be sent with Connection::close")]
    CloseViaSend,

    /// Close reason does not fit in a control frame.
    #[error("Close reason too long ({0} bytes, max 123)")]
    CloseReasonTooLong(usize),

    /// The operation was cancelled before anything was written.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl WebSocketError {
    /// Returns `true` if this is a protocol-level error (RFC 6455 violation).
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::ReservedBitsNotZero | Self::InvalidOpCode(_) | Self::FrameTooLarge
        )
    }

    /// Returns `true` if the connection was used in a state that forbids the call.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NotStarted
                | Self::AlreadyStarted
                | Self::ConnectionClosed
                | Self::CloseSent
                | Self::CloseViaSend
                | Self::CloseReasonTooLong(_)
        )
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` if this wraps an I/O error.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::IoError(_))
    }

    /// Returns the underlying I/O error, if any.
    pub fn as_io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}
