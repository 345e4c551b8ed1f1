//! The connection engine: receive loop, serialized send path and close
//! handshake.

use std::{
    fmt,
    future::Future,
    ops::ControlFlow,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    time::SystemTime,
};

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, MutexGuard, mpsc},
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, trace, warn};

use crate::{
    Result, WebSocketError,
    close::{CloseCode, CloseResult, MAX_REASON_LEN},
    codec::{Decoder, Encoder},
    frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode, Outgoing},
    options::ConnectionOptions,
    pinger,
    utf8::Utf8Validator,
};

/// Lifecycle of a connection.
///
/// ```text
/// Created ──execute──▶ Connected ──close()──────▶ CloseSent ─────peer Close──▶ Closed
///                          │                                                     ▲
///                          └──peer Close──▶ CloseReceived ──Close echoed────────┘
/// ```
///
/// Any state moves to `Closed` when the connection is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Built, `execute` not called yet.
    Created = 0,
    /// Frames flow both ways.
    Connected = 1,
    /// This side sent a Close frame and waits for the peer's.
    CloseSent = 2,
    /// The peer sent a Close frame that has not been answered yet.
    CloseReceived = 3,
    /// Terminal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Connected,
            2 => Self::CloseSent,
            3 => Self::CloseReceived,
            _ => Self::Closed,
        }
    }
}

/// Receives the frames of a running connection.
///
/// Data frames are delivered as they arrive, one call per frame: a
/// fragmented message shows up as its first frame followed by
/// `OpCode::Continuation` frames, the last one with `fin` set. Control frames
/// are only delivered with
/// [`ConnectionOptions::with_pass_all_frames_through`].
///
/// The receive loop awaits each call before reading the next frame, so a slow
/// handler applies backpressure to the peer. Frames that are kept past the
/// call should be detached with [`Frame::copy`].
///
/// ```rust
/// use async_trait::async_trait;
/// use hpx_ws_engine::{Frame, FrameHandler};
///
/// struct ByteCounter {
///     total: usize,
/// }
///
/// #[async_trait]
/// impl FrameHandler for ByteCounter {
///     async fn on_frame(&mut self, frame: Frame) {
///         self.total += frame.payload().len();
///     }
/// }
/// ```
#[async_trait]
pub trait FrameHandler: Send {
    /// Called once per delivered frame.
    async fn on_frame(&mut self, frame: Frame);
}

#[async_trait]
impl FrameHandler for mpsc::Sender<Frame> {
    async fn on_frame(&mut self, frame: Frame) {
        // A dropped receiver only means nobody listens anymore.
        let _ = self.send(frame).await;
    }
}

#[async_trait]
impl FrameHandler for mpsc::UnboundedSender<Frame> {
    async fn on_frame(&mut self, frame: Frame) {
        let _ = self.send(frame);
    }
}

/// Write side of the connection, guarded by the send lock.
struct Writer<W> {
    io: W,
    buf: BytesMut,
    encoder: Encoder,
    shut_down: bool,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    /// Encodes `frame` and writes it out completely.
    async fn write_frame(&mut self, frame: &Outgoing) -> std::io::Result<()> {
        self.buf.clear();
        self.encoder.encode_outgoing(frame, &mut self.buf);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await
    }
}

/// State shared by every handle, the receive loop and the pinger.
pub(crate) struct Inner<R, W> {
    state: AtomicU8,
    /// Taken by `execute`.
    reader: StdMutex<Option<R>>,
    writer: Mutex<Writer<W>>,
    sub_protocol: Option<String>,
    options: ConnectionOptions,
    /// Cancelled on dispose.
    token: CancellationToken,
    /// Child of `token`, also cancelled once a Close frame was sent.
    ping_token: CancellationToken,
}

impl<R, W> Inner<R, W> {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Fails unless frames may still be written by this side.
    fn ensure_writable(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Created => Err(WebSocketError::NotStarted),
            ConnectionState::CloseSent => Err(WebSocketError::CloseSent),
            ConnectionState::Closed => Err(WebSocketError::ConnectionClosed),
            ConnectionState::Connected | ConnectionState::CloseReceived => Ok(()),
        }
    }
}

impl<R, W> Inner<R, W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Acquires the send lock, giving up when `cancel` fires or the
    /// connection is disposed.
    async fn lock_writer(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, Writer<W>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WebSocketError::Cancelled),
            _ = self.token.cancelled() => Err(WebSocketError::ConnectionClosed),
            guard = self.writer.lock() => Ok(guard),
        }
    }

    /// Writes one frame while the lock is held. Dispose aborts the write.
    async fn write_locked(&self, writer: &mut Writer<W>, frame: &Outgoing) -> Result<()> {
        tokio::select! {
            result = writer.write_frame(frame) => result.map_err(WebSocketError::from),
            _ = self.token.cancelled() => Err(WebSocketError::ConnectionClosed),
        }
    }

    /// Writes a frame on behalf of the receive loop, only while this side has
    /// not sent a Close frame yet.
    ///
    /// Returns `Ok(false)` when the state no longer allows it.
    async fn write_control(&self, frame: &Outgoing, cancel: &CancellationToken) -> Result<bool> {
        let mut writer = self.lock_writer(cancel).await?;
        if self.ensure_writable().is_err() {
            return Ok(false);
        }
        self.write_locked(&mut writer, frame).await?;
        Ok(true)
    }

    /// Sends a keepalive ping unless another writer holds the send lock.
    ///
    /// Returns `Ok(false)` when the ping was skipped.
    pub(crate) async fn try_send_ping(&self, at: SystemTime) -> Result<bool> {
        let Ok(mut writer) = self.writer.try_lock() else {
            trace!("send lock busy, skipping keepalive ping");
            return Ok(false);
        };
        if self.state() != ConnectionState::Connected {
            return Ok(false);
        }
        self.write_locked(&mut writer, &Outgoing::keepalive(at)).await?;
        trace!("keepalive ping sent");
        Ok(true)
    }

    /// Tears the connection down. Safe to call any number of times.
    pub(crate) async fn dispose(&self) {
        self.token.cancel();
        if self.set_state(ConnectionState::Closed) != ConnectionState::Closed {
            debug!("connection disposed");
        }

        let mut writer = self.writer.lock().await;
        if !writer.shut_down {
            writer.shut_down = true;
            if let Err(err) = writer.io.shutdown().await {
                trace!(error = %err, "writer shutdown failed");
            }
        }
    }
}

impl<R, W> Drop for Inner<R, W> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A WebSocket connection over an inbound and an outbound byte stream.
///
/// `Connection` is a handle: clones share the same connection, so one task
/// can run the receive loop while others send. Every write goes through a
/// single FIFO lock, so frames from concurrent senders never interleave on
/// the wire.
///
/// The connection takes the streams as they are after the HTTP upgrade and
/// speaks frames on them until the close handshake completes or the
/// connection is disposed.
pub struct Connection<R, W> {
    inner: Arc<Inner<R, W>>,
}

impl<R, W> Clone for Connection<R, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, W> fmt::Debug for Connection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.inner.state())
            .field("sub_protocol", &self.inner.sub_protocol)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<R, W> Connection<R, W> {
    /// Wraps the two halves of an upgraded stream.
    ///
    /// `sub_protocol` is the protocol agreed during the handshake, kept for
    /// the caller's reference. Nothing is read or written until
    /// [`Connection::execute`] is called.
    pub fn new(reader: R, writer: W, sub_protocol: Option<String>, options: ConnectionOptions) -> Self {
        let token = CancellationToken::new();
        let ping_token = token.child_token();
        let encoder = Encoder::new(options.masking.clone());

        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ConnectionState::Created as u8),
                reader: StdMutex::new(Some(reader)),
                writer: Mutex::new(Writer {
                    io: writer,
                    buf: BytesMut::new(),
                    encoder,
                    shut_down: false,
                }),
                sub_protocol,
                options,
                token,
                ping_token,
            }),
        }
    }

    /// The sub-protocol negotiated during the handshake, if any.
    pub fn sub_protocol(&self) -> Option<&str> {
        self.inner.sub_protocol.as_deref()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Starts the connection and returns its receive loop.
    ///
    /// The connection is `Connected` as soon as this returns, so frames can
    /// be sent right away. The returned future reads frames, hands them to
    /// `handler` and resolves with the outcome of the connection:
    ///
    /// - the peer's close status after a close handshake,
    /// - the status this side sent after a protocol violation,
    /// - [`CloseResult::abnormal`] if `cancel` fired or the stream ended or
    ///   failed without a close handshake.
    ///
    /// In every case the connection is disposed when the future resolves.
    ///
    /// # Errors
    /// - [`WebSocketError::AlreadyStarted`] on a second call.
    /// - [`WebSocketError::ConnectionClosed`] after the connection was disposed.
    ///
    /// # Panics
    /// With a ping interval configured, the keepalive task is spawned here,
    /// which panics outside a Tokio runtime.
    pub fn execute<H>(
        &self,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<impl Future<Output = CloseResult> + Send + 'static>
    where
        H: FrameHandler + 'static,
    {
        if !self
            .inner
            .transition(ConnectionState::Created, ConnectionState::Connected)
        {
            return Err(match self.state() {
                ConnectionState::Closed => WebSocketError::ConnectionClosed,
                _ => WebSocketError::AlreadyStarted,
            });
        }

        let reader = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(WebSocketError::AlreadyStarted)?;

        debug!(sub_protocol = ?self.inner.sub_protocol, "connection started");

        let options = &self.inner.options;
        if options.ping_enabled() {
            pinger::spawn(
                Arc::downgrade(&self.inner),
                self.inner.ping_token.clone(),
                options.ping_interval,
            );
        }

        let receiver = Receiver {
            conn: self.clone(),
            handler,
            cancel,
            validator: Utf8Validator::new(),
            message: None,
        };
        Ok(receiver.run(reader))
    }

    /// Sends a data or Ping/Pong frame.
    ///
    /// Waits for the send lock behind any other writer. If `cancel` fires
    /// before the lock is acquired nothing is written and
    /// [`WebSocketError::Cancelled`] is returned.
    ///
    /// # Errors
    /// - [`WebSocketError::CloseViaSend`] for a Close frame; use [`Connection::close`].
    /// - [`WebSocketError::NotStarted`] before `execute`.
    /// - [`WebSocketError::CloseSent`] once this side has sent a Close frame.
    /// - [`WebSocketError::ConnectionClosed`] once the connection is closed.
    /// - [`WebSocketError::IoError`] when writing fails.
    pub async fn send(&self, frame: Frame, cancel: &CancellationToken) -> Result<()> {
        if frame.opcode() == OpCode::Close {
            return Err(WebSocketError::CloseViaSend);
        }
        self.inner.ensure_writable()?;

        let mut writer = self.inner.lock_writer(cancel).await?;
        self.inner.ensure_writable()?;

        trace!(opcode = ?frame.opcode(), fin = frame.is_fin(), len = frame.payload().len(), "sending frame");
        self.inner
            .write_locked(&mut writer, &Outgoing::from(frame))
            .await
    }

    /// Sends a Close frame with the given status and reason.
    ///
    /// If the peer already sent its Close frame this completes the handshake
    /// and disposes the connection. Otherwise the connection waits in
    /// `CloseSent` for the peer's answer, which ends the receive loop.
    /// Keepalive pings stop either way.
    ///
    /// # Errors
    /// - [`WebSocketError::CloseReasonTooLong`] if the reason exceeds 123 bytes.
    /// - [`WebSocketError::CloseSent`] if a Close frame was already sent.
    /// - The same state, cancellation and I/O errors as [`Connection::send`].
    pub async fn close(&self, result: CloseResult, cancel: &CancellationToken) -> Result<()> {
        if result.reason.len() > MAX_REASON_LEN {
            return Err(WebSocketError::CloseReasonTooLong(result.reason.len()));
        }
        self.inner.ensure_writable()?;

        let mut writer = self.inner.lock_writer(cancel).await?;
        self.inner.ensure_writable()?;

        self.inner
            .write_locked(&mut writer, &Outgoing::close(result.clone()))
            .await?;
        self.inner.ping_token.cancel();
        debug!(%result, "close frame sent");

        let previous = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match ConnectionState::from_u8(state) {
                    ConnectionState::Connected => Some(ConnectionState::CloseSent as u8),
                    ConnectionState::CloseReceived => Some(ConnectionState::Closed as u8),
                    _ => None,
                }
            });
        drop(writer);

        if previous == Ok(ConnectionState::CloseReceived as u8) {
            debug!("close handshake completed");
            self.inner.dispose().await;
        }
        Ok(())
    }

    /// Closes the connection without a close handshake.
    ///
    /// Stops the receive loop and the keepalive task, marks the connection
    /// `Closed` and shuts the writer down. Calling it again does nothing.
    pub async fn dispose(&self) {
        self.inner.dispose().await;
    }
}

/// State owned by the receive loop.
struct Receiver<R, W, H> {
    conn: Connection<R, W>,
    handler: H,
    cancel: CancellationToken,
    validator: Utf8Validator,
    /// Opcode of the fragmented message in progress.
    message: Option<OpCode>,
}

impl<R, W, H> Receiver<R, W, H>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: FrameHandler,
{
    async fn run(mut self, reader: R) -> CloseResult {
        let inner = Arc::clone(&self.conn.inner);
        let decoder = Decoder::new(Some(inner.options.frame_size_limit()));
        let mut framed = FramedRead::new(reader, decoder);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("receive cancelled");
                    None
                }
                _ = inner.token.cancelled() => None,
                next = framed.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(WebSocketError::IoError(err))) => {
                    debug!(error = %err, "read failed");
                    return self.abnormal().await;
                }
                Some(Err(err @ WebSocketError::FrameTooLarge)) => {
                    return self.fail(CloseCode::Size, err.to_string()).await;
                }
                Some(Err(err)) => {
                    return self.fail(CloseCode::Protocol, err.to_string()).await;
                }
                None => {
                    debug!("stream ended without close handshake");
                    return self.abnormal().await;
                }
            };

            trace!(
                opcode = ?frame.opcode(),
                fin = frame.is_fin(),
                len = frame.payload().len(),
                "frame received"
            );

            if let ControlFlow::Break(result) = self.on_frame(frame).await {
                return result;
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> ControlFlow<CloseResult> {
        let opcode = frame.opcode();

        if opcode.is_control() && !frame.is_fin() {
            return self.break_with(CloseCode::Protocol, "fragmented control frame").await;
        }

        match (opcode, self.message) {
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                return self
                    .break_with(
                        CloseCode::Protocol,
                        "received non-continuation frame during fragmented message",
                    )
                    .await;
            }
            (OpCode::Continuation, None) => {
                return self
                    .break_with(
                        CloseCode::Protocol,
                        "continuation received when expecting new message",
                    )
                    .await;
            }
            _ => {}
        }

        match opcode {
            OpCode::Close => ControlFlow::Break(self.on_close(frame).await),
            OpCode::Ping => self.on_ping(frame).await,
            OpCode::Pong => {
                if frame.payload().len() > MAX_CONTROL_PAYLOAD {
                    return self
                        .break_with(CloseCode::Protocol, "Control frame exceeded maximum size")
                        .await;
                }
                self.pass_through(frame).await;
                ControlFlow::Continue(())
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => self.on_data(frame).await,
        }
    }

    async fn on_data(&mut self, frame: Frame) -> ControlFlow<CloseResult> {
        let opcode = frame.opcode();
        let fin = frame.is_fin();
        let is_text = opcode == OpCode::Text
            || (opcode == OpCode::Continuation && self.message == Some(OpCode::Text));

        if is_text && !self.validator.validate(frame.payload(), fin) {
            return self
                .break_with(CloseCode::Invalid, "invalid UTF-8 in text message")
                .await;
        }

        if fin {
            self.validator.reset();
            self.message = None;
        } else if opcode != OpCode::Continuation {
            self.message = Some(opcode);
        }

        self.handler.on_frame(frame).await;
        ControlFlow::Continue(())
    }

    async fn on_ping(&mut self, frame: Frame) -> ControlFlow<CloseResult> {
        if frame.payload().len() > MAX_CONTROL_PAYLOAD {
            return self
                .break_with(CloseCode::Protocol, "Ping frame exceeded maximum size")
                .await;
        }

        let pong = Outgoing::from(Frame::pong(frame.payload().clone()));
        match self.conn.inner.write_control(&pong, &self.cancel).await {
            Ok(sent) => trace!(sent, "pong"),
            Err(err) => {
                debug!(error = %err, "failed to answer ping");
                return ControlFlow::Break(self.abnormal().await);
            }
        }

        self.pass_through(frame).await;
        ControlFlow::Continue(())
    }

    async fn on_close(&mut self, frame: Frame) -> CloseResult {
        let payload = frame.payload();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return self
                .fail(CloseCode::Protocol, "Control frame exceeded maximum size")
                .await;
        }
        if payload.len() == 1 {
            return self
                .fail(CloseCode::Protocol, "Close frame payload too short")
                .await;
        }
        if payload.len() > 2 && !Utf8Validator::new().validate(&payload[2..], true) {
            return self
                .fail(CloseCode::Invalid, "invalid UTF-8 in close reason")
                .await;
        }

        let result = frame.close_result();
        if result.close_code().is_some_and(|code| !code.is_allowed()) {
            return self.fail(CloseCode::Protocol, "Invalid close status").await;
        }

        debug!(%result, "close frame received");
        self.pass_through(frame).await;

        let inner = Arc::clone(&self.conn.inner);
        if inner.transition(ConnectionState::CloseSent, ConnectionState::Closed) {
            debug!("close handshake completed");
        } else if inner.transition(ConnectionState::Connected, ConnectionState::CloseReceived) {
            let echo = CloseResult {
                code: result.code,
                reason: String::new(),
            };
            if let Err(err) = self.echo_close(echo).await {
                debug!(error = %err, "failed to echo close frame");
            }
        }

        inner.dispose().await;
        result
    }

    /// Answers the peer's Close frame, unless a local `close` call got to the
    /// send lock first.
    async fn echo_close(&mut self, echo: CloseResult) -> Result<()> {
        let inner = &self.conn.inner;
        let mut writer = inner.lock_writer(&self.cancel).await?;
        if inner.state() != ConnectionState::CloseReceived {
            return Ok(());
        }
        inner.write_locked(&mut writer, &Outgoing::close(echo)).await?;
        inner.set_state(ConnectionState::Closed);
        debug!("close handshake completed");
        Ok(())
    }

    async fn pass_through(&mut self, frame: Frame) {
        if self.conn.inner.options.pass_all_frames_through {
            self.handler.on_frame(frame).await;
        }
    }

    async fn break_with(
        &mut self,
        code: CloseCode,
        reason: &'static str,
    ) -> ControlFlow<CloseResult> {
        ControlFlow::Break(self.fail(code, reason).await)
    }

    /// Closes the connection after a protocol violation.
    ///
    /// A Close frame carrying `code` and `reason` is sent unless this side
    /// already sent one, then the connection is disposed.
    async fn fail(&mut self, code: CloseCode, reason: impl Into<String>) -> CloseResult {
        let result = CloseResult::new(code, reason);
        warn!(code = u16::from(code), reason = %result.reason, "protocol violation, closing connection");

        let inner = &self.conn.inner;
        match inner
            .write_control(&Outgoing::close(result.clone()), &self.cancel)
            .await
        {
            Ok(true) => {
                inner.set_state(ConnectionState::CloseSent);
            }
            Ok(false) => {}
            Err(err) => debug!(error = %err, "failed to send close frame"),
        }

        inner.dispose().await;
        result
    }

    async fn abnormal(&mut self) -> CloseResult {
        self.conn.inner.dispose().await;
        CloseResult::abnormal()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    type Duplex = tokio::io::DuplexStream;

    fn connection(options: ConnectionOptions) -> (Connection<Duplex, Duplex>, Duplex, Duplex) {
        let (reader, peer_writer) = duplex(1024);
        let (writer, peer_reader) = duplex(1024);
        (
            Connection::new(reader, writer, Some("chat".into()), options),
            peer_writer,
            peer_reader,
        )
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            ConnectionState::Created,
            ConnectionState::Connected,
            ConnectionState::CloseSent,
            ConnectionState::CloseReceived,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[tokio::test]
    async fn test_accessors() {
        let (conn, _w, _r) = connection(ConnectionOptions::default().with_max_frame_size(10));
        assert_eq!(conn.sub_protocol(), Some("chat"));
        assert_eq!(conn.options().max_frame_size, Some(10));
        assert_eq!(conn.state(), ConnectionState::Created);
    }

    #[tokio::test]
    async fn test_send_before_execute() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        let cancel = CancellationToken::new();
        assert!(matches!(
            conn.send(Frame::text("early"), &cancel).await,
            Err(WebSocketError::NotStarted)
        ));
        assert!(matches!(
            conn.close(CloseResult::normal(), &cancel).await,
            Err(WebSocketError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_execute_twice() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let _receive = conn.execute(tx.clone(), CancellationToken::new()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(matches!(
            conn.execute(tx, CancellationToken::new()),
            Err(WebSocketError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_execute_after_dispose() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        conn.dispose().await;
        conn.dispose().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            conn.execute(tx, CancellationToken::new()),
            Err(WebSocketError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_frame_via_send_rejected() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let _receive = conn.execute(tx, CancellationToken::new()).unwrap();

        let frame = Frame::new(true, OpCode::Close, &b"\x03\xE8"[..]);
        assert!(matches!(
            conn.send(frame, &CancellationToken::new()).await,
            Err(WebSocketError::CloseViaSend)
        ));
    }

    #[tokio::test]
    async fn test_close_reason_too_long() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let _receive = conn.execute(tx, CancellationToken::new()).unwrap();

        let result = CloseResult::new(CloseCode::Normal, "x".repeat(124));
        assert!(matches!(
            conn.close(result, &CancellationToken::new()).await,
            Err(WebSocketError::CloseReasonTooLong(124))
        ));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_last_handle_drop_cancels_token() {
        let (conn, _w, _r) = connection(ConnectionOptions::default());
        let token = conn.inner.token.clone();
        let ping_token = conn.inner.ping_token.clone();
        drop(conn);
        assert!(token.is_cancelled());
        assert!(ping_token.is_cancelled());
    }
}
