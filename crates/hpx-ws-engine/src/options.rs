//! Connection configuration.

use std::{fmt, sync::Arc, time::Duration};

/// The default largest incoming frame payload, 1 MiB.
///
/// Frames declaring a bigger payload are rejected before any of it is read.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Produces the mask key for each outgoing frame.
pub type MaskGenerator = Arc<dyn Fn() -> [u8; 4] + Send + Sync>;

/// How outgoing frames are masked.
///
/// Clients must mask every frame they send and servers must not
/// ([RFC 6455 Section 5.1](https://datatracker.ietf.org/doc/html/rfc6455#section-5.1)).
/// The engine does not know which side it is on, so the choice is made here.
#[derive(Clone, Default)]
pub enum Masking {
    /// Frames are sent unmasked.
    #[default]
    None,
    /// Every frame uses the same key. Useful for tests and reproducible captures.
    Fixed([u8; 4]),
    /// A fresh random key per frame.
    Random,
    /// A caller supplied key source, called once per frame.
    Generator(MaskGenerator),
}

impl Masking {
    /// Returns the key for the next outgoing frame, or `None` when unmasked.
    pub fn next_key(&self) -> Option<[u8; 4]> {
        match self {
            Masking::None => None,
            Masking::Fixed(key) => Some(*key),
            Masking::Random => Some(rand::random()),
            Masking::Generator(generate) => Some(generate()),
        }
    }

    /// Returns `true` unless frames are sent unmasked.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Masking::None)
    }
}

impl fmt::Debug for Masking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Masking::None => f.write_str("None"),
            Masking::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            Masking::Random => f.write_str("Random"),
            Masking::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Configuration options for a WebSocket connection.
///
/// ```rust
/// use std::time::Duration;
/// use hpx_ws_engine::ConnectionOptions;
///
/// // Client-side connection with a 30 second keepalive.
/// let options = ConnectionOptions::default()
///     .with_ping_interval(Duration::from_secs(30))
///     .with_random_mask()
///     .with_max_frame_size(1024 * 1024);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConnectionOptions {
    /// Interval between keepalive pings. `Duration::ZERO` disables them.
    ///
    /// Default: disabled
    pub ping_interval: Duration,

    /// Mask applied to outgoing frames.
    ///
    /// Default: [`Masking::None`]
    pub masking: Masking,

    /// Hand control frames (Ping, Pong, Close) to the frame handler too.
    ///
    /// The engine handles control frames the same way either way: pings are
    /// answered and the close handshake completes.
    ///
    /// Default: `false`
    pub pass_all_frames_through: bool,

    /// Largest incoming frame payload accepted, in bytes. Bigger frames close
    /// the connection with status 1009.
    ///
    /// Default: 1 MiB (1,048,576 bytes) as defined in [`MAX_FRAME_SIZE`]
    pub max_frame_size: Option<usize>,
}

impl ConnectionOptions {
    /// Sends a keepalive ping every `interval`. `Duration::ZERO` disables it.
    pub fn with_ping_interval(self, interval: Duration) -> Self {
        Self {
            ping_interval: interval,
            ..self
        }
    }

    /// Disables keepalive pings.
    pub fn without_ping(self) -> Self {
        self.with_ping_interval(Duration::ZERO)
    }

    /// Sets how outgoing frames are masked.
    pub fn with_masking(self, masking: Masking) -> Self {
        Self { masking, ..self }
    }

    /// Masks every outgoing frame with `key`.
    pub fn with_fixed_mask(self, key: [u8; 4]) -> Self {
        self.with_masking(Masking::Fixed(key))
    }

    /// Masks every outgoing frame with a fresh random key, as clients do.
    pub fn with_random_mask(self) -> Self {
        self.with_masking(Masking::Random)
    }

    /// Masks every outgoing frame with a key from `generator`.
    pub fn with_mask_generator<F>(self, generator: F) -> Self
    where
        F: Fn() -> [u8; 4] + Send + Sync + 'static,
    {
        self.with_masking(Masking::Generator(Arc::new(generator)))
    }

    /// Delivers Ping, Pong and Close frames to the handler as well.
    pub fn with_pass_all_frames_through(self, enabled: bool) -> Self {
        Self {
            pass_all_frames_through: enabled,
            ..self
        }
    }

    /// Limits the payload size of incoming frames.
    pub fn with_max_frame_size(self, size: usize) -> Self {
        Self {
            max_frame_size: Some(size),
            ..self
        }
    }

    /// Returns the effective incoming frame size limit.
    pub fn frame_size_limit(&self) -> usize {
        self.max_frame_size.unwrap_or(MAX_FRAME_SIZE)
    }

    /// Returns `true` if keepalive pings are enabled.
    pub fn ping_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert!(!options.ping_enabled());
        assert!(!options.masking.is_enabled());
        assert!(!options.pass_all_frames_through);
        assert!(options.max_frame_size.is_none());
        assert_eq!(options.frame_size_limit(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_builders() {
        let options = ConnectionOptions::default()
            .with_ping_interval(Duration::from_secs(5))
            .with_fixed_mask([1, 2, 3, 4])
            .with_pass_all_frames_through(true)
            .with_max_frame_size(4096);

        assert_eq!(options.ping_interval, Duration::from_secs(5));
        assert!(options.ping_enabled());
        assert_eq!(options.masking.next_key(), Some([1, 2, 3, 4]));
        assert!(options.pass_all_frames_through);
        assert_eq!(options.max_frame_size, Some(4096));
        assert_eq!(options.frame_size_limit(), 4096);

        let options = options.without_ping();
        assert!(!options.ping_enabled());
    }

    #[test]
    fn test_mask_generator_called_per_frame() {
        let counter = Arc::new(AtomicU8::new(0));
        let source = counter.clone();
        let options = ConnectionOptions::default().with_mask_generator(move || {
            let n = source.fetch_add(1, Ordering::Relaxed);
            [n; 4]
        });

        assert_eq!(options.masking.next_key(), Some([0; 4]));
        assert_eq!(options.masking.next_key(), Some([1; 4]));
        assert_eq!(format!("{:?}", options.masking), "Generator(..)");
    }

    #[test]
    fn test_random_mask() {
        let masking = ConnectionOptions::default().with_random_mask().masking;
        assert!(masking.is_enabled());
        assert!(masking.next_key().is_some());
        assert!(Masking::None.next_key().is_none());
    }
}
