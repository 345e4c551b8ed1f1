//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! A [`Frame`] is the unit handed to and received from a
//! [`Connection`](crate::Connection). Masking is a property of the wire
//! encoding, not of the frame: incoming frames are already unmasked and
//! outgoing frames are masked according to the connection's
//! [`Masking`](crate::Masking) option.
//!
//! ```rust
//! use hpx_ws_engine::frame::{Frame, OpCode};
//!
//! let text_frame = Frame::text("Hello, WebSocket!");
//! let ping = Frame::ping("Ping payload");
//!
//! // Fragmented message
//! let first = Frame::text("Hello, ").with_fin(false);
//! let last = Frame::continuation("World!");
//! assert_eq!(last.opcode(), OpCode::Continuation);
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    WebSocketError,
    close::{CloseCode, CloseResult},
};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest frame header: 2 base bytes, 8 length bytes, 4 mask bytes.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// WebSocket operation code (OpCode) that determines the meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8).
/// The ranges 0x3-0x7 and 0xB-0xF are reserved; they have no variant and
/// [`OpCode::try_from`] rejects them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` if the `OpCode` carries message data (`Continuation`, `Text`, or `Binary`).
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Converts a `Frame` into a tuple of `(OpCode, Bytes)`.
impl From<Frame> for (OpCode, Bytes) {
    fn from(val: Frame) -> Self {
        (val.opcode, val.payload)
    }
}

/// Builds a final frame from an opcode and payload.
impl<T> From<(OpCode, T)> for Frame
where
    T: Into<Bytes>,
{
    fn from((opcode, payload): (OpCode, T)) -> Self {
        Self::new(true, opcode, payload)
    }
}

/// One WebSocket frame: the FIN flag, the opcode and the unmasked payload.
///
/// Frames received from a connection share their payload with the
/// connection's read buffer. Cloning a frame is cheap and keeps sharing it;
/// use [`Frame::copy`] to detach the payload into its own allocation when the
/// frame is kept around.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame with full control over the FIN flag.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Creates a text frame with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, payload)
    }

    /// Creates a binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, payload)
    }

    /// Creates a ping frame with the given payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, payload)
    }

    /// Creates a pong frame with the given payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    /// Creates a continuation frame with the given payload.
    ///
    /// The first fragment of a message is a Text or Binary frame with `fin`
    /// unset, followed by continuation frames, the last one with `fin` set.
    ///
    /// ```rust
    /// use hpx_ws_engine::frame::Frame;
    ///
    /// let first = Frame::text("Hello, ").with_fin(false);
    /// let middle = Frame::continuation("World").with_fin(false);
    /// let last = Frame::continuation("!");
    /// assert!(last.is_fin());
    /// ```
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, payload)
    }

    /// Sets the fin flag and returns self for method chaining.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Returns the frame's opcode.
    #[inline(always)]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns whether this is the final frame in a message.
    #[inline(always)]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// Returns a reference to the frame's payload.
    #[inline(always)]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    #[inline(always)]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Consumes the frame and returns its opcode, whether it is final and payload.
    #[inline(always)]
    pub fn into_parts(self) -> (OpCode, bool, Bytes) {
        (self.opcode, self.fin, self.payload)
    }

    /// Returns a frame with the same header and a payload copied into a new
    /// allocation, no longer sharing memory with the read buffer.
    pub fn copy(&self) -> Self {
        Self {
            fin: self.fin,
            opcode: self.opcode,
            payload: Bytes::copy_from_slice(&self.payload),
        }
    }

    /// Returns the payload as a string slice, if it is valid UTF-8.
    ///
    /// Only a complete, unfragmented text frame is guaranteed to hold whole
    /// characters.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Extracts the close code from a Close frame's payload.
    ///
    /// Returns `None` if the payload is too short to contain one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Decodes a Close frame's payload into a [`CloseResult`].
    pub fn close_result(&self) -> CloseResult {
        CloseResult::from_payload(&self.payload)
    }
}

/// Source of an outgoing frame's payload bytes.
///
/// Besides plain bytes, the engine writes two payloads it builds itself:
/// close frames from a [`CloseResult`] and keepalive pings from a timestamp.
/// Both are rendered straight into the write buffer by the encoder.
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Bytes(Bytes),
    Close(CloseResult),
    Timestamp(SystemTime),
}

impl Payload {
    /// Number of payload bytes this source produces.
    pub(crate) fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Close(result) => result.encoded_len(),
            Payload::Timestamp(at) => format_timestamp(*at).len(),
        }
    }

    /// Appends the payload bytes to `dst`.
    pub(crate) fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Payload::Bytes(bytes) => dst.put_slice(bytes),
            Payload::Close(result) => result.encode(dst),
            Payload::Timestamp(at) => dst.put_slice(format_timestamp(*at).as_bytes()),
        }
    }
}

/// A frame waiting to be encoded.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) payload: Payload,
}

impl Outgoing {
    pub(crate) fn close(result: CloseResult) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Close,
            payload: Payload::Close(result),
        }
    }

    pub(crate) fn keepalive(at: SystemTime) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Ping,
            payload: Payload::Timestamp(at),
        }
    }
}

impl From<Frame> for Outgoing {
    fn from(frame: Frame) -> Self {
        Self {
            fin: frame.fin,
            opcode: frame.opcode,
            payload: Payload::Bytes(frame.payload),
        }
    }
}

/// Formats a keepalive timestamp as `<unix seconds>.<milliseconds>`.
pub(crate) fn format_timestamp(at: SystemTime) -> String {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!(
        "{}.{:03}",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}
