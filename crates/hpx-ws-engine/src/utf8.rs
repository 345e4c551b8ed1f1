//! Incremental UTF-8 validation for fragmented text messages.
//!
//! A text message may be split across any number of frames and a frame
//! boundary may fall in the middle of a multi-byte character. The
//! [`Utf8Validator`] keeps the partially decoded character between calls so
//! every fragment can be checked as it arrives, without buffering the
//! message.
//!
//! Validation fails as soon as the bytes seen so far cannot be completed into
//! a valid character: overlong forms, UTF-16 surrogates and values above
//! U+10FFFF are rejected at the first byte that rules out every completion.
//!
//! ```rust
//! use hpx_ws_engine::utf8::Utf8Validator;
//!
//! let mut validator = Utf8Validator::new();
//! // "€" is E2 82 AC, split across two fragments.
//! assert!(validator.validate(b"price: \xE2\x82", false));
//! assert!(validator.validate(b"\xAC", true));
//!
//! // A lone continuation byte is never valid.
//! assert!(!validator.validate(b"\x80", true));
//! ```

/// Sequence length by lead byte: 0 = never a lead byte, 1-4 = bytes in the sequence.
static UTF8_WIDTH: [u8; 256] = build_width_table();

const fn build_width_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = match i {
            0x00..=0x7F => 1,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 0,
        };
        i += 1;
    }
    table
}

/// Value bits carried by the lead byte, by sequence width.
const LEAD_MASK: [u8; 5] = [0, 0x7F, 0x1F, 0x0F, 0x07];

/// Smallest code point that needs a sequence of the given width.
const MIN_CODE_POINT: [u32; 5] = [0, 0, 0x80, 0x800, 0x1_0000];

const MAX_CODE_POINT: u32 = 0x10_FFFF;
const SURROGATES: std::ops::RangeInclusive<u32> = 0xD800..=0xDFFF;

/// Decoder state carried across fragment boundaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Utf8State {
    /// A multi-byte character has started and is not complete yet.
    pub within_sequence: bool,
    /// Continuation bytes still expected for the current character.
    pub remaining: u32,
    /// Bits decoded so far for the current character.
    pub value: u32,
    /// Lowest code point the current sequence width may encode.
    pub min_code_point: u32,
}

impl Utf8State {
    /// Returns `true` if some completion of the current sequence is a valid
    /// scalar value.
    #[inline]
    fn can_complete(&self) -> bool {
        let shift = 6 * self.remaining;
        let lowest = self.value << shift;
        let highest = lowest | ((1 << shift) - 1);

        highest >= self.min_code_point
            && lowest <= MAX_CODE_POINT
            && !(SURROGATES.contains(&lowest) && SURROGATES.contains(&highest))
    }
}

/// Validates `payload` as the next piece of a UTF-8 stream.
///
/// `state` carries any partial character from the previous call. Returns
/// `false` as soon as an invalid sequence is found. When `is_final` is set the
/// payload must end on a character boundary, and on success the state is reset
/// for the next message.
pub fn validate_utf8(state: &mut Utf8State, payload: &[u8], is_final: bool) -> bool {
    for &byte in payload {
        if state.within_sequence {
            if byte & 0xC0 != 0x80 {
                return false;
            }
            state.value = (state.value << 6) | u32::from(byte & 0x3F);
            state.remaining -= 1;
        } else {
            let width = UTF8_WIDTH[usize::from(byte)];
            match width {
                0 => return false,
                1 => continue,
                _ => {
                    let width = usize::from(width);
                    state.within_sequence = true;
                    state.value = u32::from(byte & LEAD_MASK[width]);
                    state.remaining = width as u32 - 1;
                    state.min_code_point = MIN_CODE_POINT[width];
                }
            }
        }

        if !state.can_complete() {
            return false;
        }

        if state.remaining == 0 {
            state.within_sequence = false;
        }
    }

    if is_final {
        if state.within_sequence {
            return false;
        }
        *state = Utf8State::default();
    }

    true
}

/// Stateful validator for one logical message at a time.
#[derive(Debug, Default, Clone)]
pub struct Utf8Validator {
    state: Utf8State,
}

impl Utf8Validator {
    /// Creates a validator positioned between characters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the next fragment of the current message.
    ///
    /// See [`validate_utf8`].
    #[inline]
    pub fn validate(&mut self, payload: &[u8], is_final: bool) -> bool {
        validate_utf8(&mut self.state, payload, is_final)
    }

    /// Forgets any partial character, ready for a new message.
    #[inline]
    pub fn reset(&mut self) {
        self.state = Utf8State::default();
    }

    /// Returns the current decoder state.
    pub fn state(&self) -> Utf8State {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "Hello, WebSocket!",
        "κόσμε",
        "Hello, 世界! 🌍",
        "\u{7F}\u{80}\u{7FF}\u{800}\u{FFFF}\u{10000}\u{10FFFF}",
        "\u{D7FF}\u{E000}\u{FFFD}",
    ];

    fn validate_all(bytes: &[u8]) -> bool {
        Utf8Validator::new().validate(bytes, true)
    }

    #[test]
    fn test_width_table() {
        assert_eq!(UTF8_WIDTH[0x00], 1);
        assert_eq!(UTF8_WIDTH[0x7F], 1);
        assert_eq!(UTF8_WIDTH[0x80], 0);
        assert_eq!(UTF8_WIDTH[0xBF], 0);
        assert_eq!(UTF8_WIDTH[0xC2], 2);
        assert_eq!(UTF8_WIDTH[0xE0], 3);
        assert_eq!(UTF8_WIDTH[0xF4], 4);
        assert_eq!(UTF8_WIDTH[0xF8], 0);
        assert_eq!(UTF8_WIDTH[0xFF], 0);
    }

    #[test]
    fn test_valid_whole() {
        for sample in SAMPLES {
            assert!(validate_all(sample.as_bytes()), "rejected {sample:?}");
        }
    }

    #[test]
    fn test_valid_split_at_every_boundary() {
        for sample in SAMPLES {
            let bytes = sample.as_bytes();
            for split in 0..=bytes.len() {
                let mut validator = Utf8Validator::new();
                assert!(validator.validate(&bytes[..split], false), "{sample:?} @ {split}");
                assert!(validator.validate(&bytes[split..], true), "{sample:?} @ {split}");
                assert_eq!(validator.state(), Utf8State::default());
            }
        }
    }

    #[test]
    fn test_valid_byte_by_byte() {
        let bytes = "a€𝄞b".as_bytes();
        let mut validator = Utf8Validator::new();
        for (i, byte) in bytes.iter().enumerate() {
            let is_final = i == bytes.len() - 1;
            assert!(validator.validate(std::slice::from_ref(byte), is_final));
        }
    }

    #[test]
    fn test_fragments_of_hello() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"He", false));
        assert!(validator.validate(b"llo", false));
        assert!(validator.validate(b"", true));
    }

    #[test]
    fn test_lone_continuation_byte() {
        assert!(!validate_all(b"\x80"));
        assert!(!validate_all(b"abc\xBFdef"));
    }

    #[test]
    fn test_overlong_encodings() {
        // U+0000 as two bytes.
        assert!(!validate_all(b"\xC0\x80"));
        assert!(!validate_all(b"\xC1\xBF"));
        // U+007F as three bytes, U+07FF as three bytes.
        assert!(!validate_all(b"\xE0\x81\xBF"));
        assert!(!validate_all(b"\xE0\x9F\xBF"));
        // U+FFFF as four bytes.
        assert!(!validate_all(b"\xF0\x8F\xBF\xBF"));
    }

    #[test]
    fn test_overlong_rejected_at_lead_byte() {
        let mut validator = Utf8Validator::new();
        assert!(!validator.validate(b"\xC0", false));
    }

    #[test]
    fn test_surrogates() {
        assert!(!validate_all(b"\xED\xA0\x80"));
        assert!(!validate_all(b"\xED\xBF\xBF"));
        // Rejected before the third byte arrives.
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"\xED", false));
        assert!(!validator.validate(b"\xA0", false));
    }

    #[test]
    fn test_above_max_code_point() {
        assert!(!validate_all(b"\xF4\x90\x80\x80"));
        assert!(!validate_all(b"\xF5\x80\x80\x80"));
        assert!(!validate_all(b"\xF8\x88\x80\x80\x80"));
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"\xF4", false));
        assert!(!validator.validate(b"\x90", false));
    }

    #[test]
    fn test_lead_byte_where_continuation_expected() {
        assert!(!validate_all(b"\xE2\x82a"));
        assert!(!validate_all(b"\xC3\xC3"));
    }

    #[test]
    fn test_truncated_final_fragment() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"\xE2\x82", false));
        assert!(!validator.validate(b"", true));
    }

    #[test]
    fn test_incomplete_prefix_is_accepted_until_final() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"\xF0\x9F", false));
        assert!(validator.state().within_sequence);
        assert_eq!(validator.state().remaining, 2);
        assert!(validator.validate(b"\x8C\x8D", true));
    }

    #[test]
    fn test_reset_discards_partial_character() {
        let mut validator = Utf8Validator::new();
        assert!(validator.validate(b"\xE2", false));
        validator.reset();
        assert!(validator.validate(b"plain", true));
    }
}
