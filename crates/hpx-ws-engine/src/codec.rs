//! # codec
//!
//! Byte-level encoding and decoding of WebSocket frames (RFC 6455 Section 5.2).
//!
//! The [`Decoder`] plugs into [`tokio_util::codec::FramedRead`] and yields one
//! [`Frame`] per wire frame, unmasked, with its payload split off the read
//! buffer. It only checks what the header itself can tell: reserved bits,
//! reserved opcodes and the payload length. Fragmentation, control frame and
//! UTF-8 rules are enforced by the connection, which knows the message being
//! received.
//!
//! The [`Encoder`] serializes frames into a write buffer, masking the payload
//! as it is copied.
//!
//! ```text
//! Network bytes → Decoder → Frame(Text, fin=0)
//! Network bytes → Decoder → Frame(Continuation, fin=0)
//! Network bytes → Decoder → Frame(Continuation, fin=1)
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec;

use crate::{
    WebSocketError,
    frame::{Frame, MAX_HEAD_SIZE, OpCode, Outgoing},
    mask,
    options::Masking,
};

/// Header of a frame whose payload has not fully arrived yet.
#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// A decoder for WebSocket frames.
///
/// The header of a frame is parsed once; while the payload is still arriving
/// it is kept here, so large frames can span any number of reads.
#[derive(Debug, Default)]
pub struct Decoder {
    /// Parsed header waiting for its payload.
    state: Option<PendingHeader>,
    /// Maximum allowed size for a frame payload.
    max_frame_size: Option<usize>,
}

impl Decoder {
    /// Creates a decoder, optionally limiting the payload size of a frame.
    pub fn new(max_frame_size: Option<usize>) -> Self {
        Self {
            state: None,
            max_frame_size,
        }
    }

    /// Parses a frame header from the front of `src`.
    ///
    /// Returns `Ok(None)` without consuming anything if the header is
    /// incomplete.
    fn decode_header(&self, src: &mut BytesMut) -> Result<Option<PendingHeader>, WebSocketError> {
        if src.remaining() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;

        // RSV1-3 are only meaningful with negotiated extensions.
        if src[0] & 0b0111_0000 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_size = 2 + extra + if masked { 4 } else { 0 };

        if src.remaining() < header_size {
            return Ok(None);
        }

        src.advance(2);

        let payload_len = match extra {
            0 => usize::from(length_code),
            2 => usize::from(src.get_u16()),
            _ => {
                // The most significant bit of a 64-bit length must be 0, and
                // no buffer can hold more than `isize::MAX` bytes.
                let len = src.get_u64();
                usize::try_from(len)
                    .ok()
                    .filter(|&len| len <= isize::MAX as usize)
                    .ok_or(WebSocketError::FrameTooLarge)?
            }
        };

        let mask = if masked {
            Some(src.get_u32().to_be_bytes())
        } else {
            None
        };

        if self.max_frame_size.is_some_and(|max| payload_len > max) {
            return Err(WebSocketError::FrameTooLarge);
        }

        Ok(Some(PendingHeader {
            fin,
            opcode,
            mask,
            payload_len,
        }))
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes one frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a complete frame, already unmasked.
    /// - `Ok(None)`: more data is needed.
    /// - `Err(WebSocketError)`: the header violates the protocol.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.state.take() {
            Some(header) => header,
            None => match self.decode_header(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        // The buffer grows with what actually arrives, never with what the
        // header declares.
        if src.remaining() < header.payload_len {
            self.state = Some(header);
            return Ok(None);
        }

        if let Some(key) = header.mask {
            mask::apply_mask(&mut src[..header.payload_len], key);
        }

        let payload = src.split_to(header.payload_len).freeze();
        Ok(Some(Frame::new(header.fin, header.opcode, payload)))
    }
}

/// Serializes frames into a write buffer.
///
/// Each frame is masked according to the [`Masking`] the encoder was built
/// with.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    masking: Masking,
}

impl Encoder {
    pub fn new(masking: Masking) -> Self {
        Self { masking }
    }

    /// Appends `frame` to `dst`, masking it with the next configured key.
    pub(crate) fn encode_outgoing(&self, frame: &Outgoing, dst: &mut BytesMut) {
        Self::encode_with_mask(frame, self.masking.next_key(), dst);
    }

    /// Appends `frame` to `dst`, masked with `mask` when one is given.
    pub(crate) fn encode_with_mask(frame: &Outgoing, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
        let payload_len = frame.payload.len();
        dst.reserve(MAX_HEAD_SIZE + payload_len);

        let first = u8::from(frame.opcode) | if frame.fin { 0x80 } else { 0 };
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        dst.put_u8(first);

        if payload_len < 126 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if let Ok(len) = u16::try_from(payload_len) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        let index = match mask {
            Some(key) => {
                dst.put_slice(&key);
                dst.len()
            }
            None => dst.len(),
        };

        frame.payload.write_to(dst);

        if let Some(key) = mask {
            mask::apply_mask(&mut dst[index..], key);
        }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    #[inline]
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_outgoing(&Outgoing::from(frame), dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    use super::*;
    use crate::close::CloseResult;

    fn encode(frame: Frame, mask: Option<[u8; 4]>) -> BytesMut {
        let mut dst = BytesMut::new();
        Encoder::encode_with_mask(&Outgoing::from(frame), mask, &mut dst);
        dst
    }

    fn decode_all(mut src: BytesMut) -> Frame {
        let mut decoder = Decoder::new(None);
        let frame = decoder.decode(&mut src).unwrap().expect("complete frame");
        assert!(src.is_empty());
        frame
    }

    #[test]
    fn test_round_trip_lengths() {
        for len in [0, 1, 125, 126, 65535, 65536, 70_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for mask in [None, Some([0x37, 0xFA, 0x21, 0x3D])] {
                let frame = Frame::binary(payload.clone());
                let decoded = decode_all(encode(frame.clone(), mask));
                assert_eq!(decoded, frame, "len {len} mask {mask:?}");
            }
        }
    }

    #[test]
    fn test_header_length_encoding() {
        let short = encode(Frame::text(vec![b'a'; 125]), None);
        assert_eq!(&short[..2], &[0x81, 125]);

        let medium = encode(Frame::binary(vec![0u8; 126]), None);
        assert_eq!(&medium[..4], &[0x82, 126, 0x00, 126]);

        let long = encode(Frame::binary(vec![0u8; 65536]), None);
        assert_eq!(&long[..10], &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_rfc_masked_hello() {
        // RFC 6455 Section 5.7: a single-frame masked text message.
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        assert_eq!(
            &encode(Frame::text("Hello"), Some([0x37, 0xfa, 0x21, 0x3d]))[..],
            &wire
        );

        let frame = decode_all(BytesMut::from(&wire[..]));
        assert_eq!(frame.as_str(), Some("Hello"));
        assert!(frame.is_fin());
    }

    #[test]
    fn test_fin_bit() {
        let wire = encode(Frame::text("He").with_fin(false), None);
        assert_eq!(wire[0], 0x01);
        assert!(!decode_all(wire).is_fin());
    }

    #[test]
    fn test_payload_arrives_byte_by_byte() {
        let frame = Frame::binary(vec![9u8; 300]);
        let wire = encode(frame.clone(), Some([1, 2, 3, 4]));

        let mut decoder = Decoder::new(None);
        let mut src = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            assert!(decoded.is_none());
            src.put_u8(*byte);
            decoded = decoder.decode(&mut src).unwrap();
        }
        assert_eq!(decoded, Some(frame));
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut src = encode(Frame::text("one"), None);
        src.extend_from_slice(&encode(Frame::ping("two"), Some([5, 6, 7, 8])));

        let mut decoder = Decoder::new(None);
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(Frame::text("one")));
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(Frame::ping("two")));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        for first in [0xC1, 0xA1, 0x91] {
            let mut src = BytesMut::from(&[first, 0x00][..]);
            assert!(matches!(
                Decoder::new(None).decode(&mut src),
                Err(WebSocketError::ReservedBitsNotZero)
            ));
        }
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        let mut src = BytesMut::from(&[0x83, 0x00][..]);
        assert!(matches!(
            Decoder::new(None).decode(&mut src),
            Err(WebSocketError::InvalidOpCode(0x3))
        ));
    }

    #[test]
    fn test_max_frame_size() {
        let wire = encode(Frame::binary(vec![0u8; 1025]), None);
        let mut src = wire.clone();
        assert!(matches!(
            Decoder::new(Some(1024)).decode(&mut src),
            Err(WebSocketError::FrameTooLarge)
        ));

        let mut src = wire;
        assert!(Decoder::new(Some(1025)).decode(&mut src).unwrap().is_some());
    }

    #[test]
    fn test_huge_declared_length_rejected_by_limit() {
        let mut src = BytesMut::from(&[0x82, 127, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        assert!(matches!(
            Decoder::new(Some(1 << 20)).decode(&mut src),
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_length_with_top_bit_rejected() {
        let mut src = BytesMut::from(&[0x82, 127, 0x80, 0, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            Decoder::new(None).decode(&mut src),
            Err(WebSocketError::FrameTooLarge)
        ));

        let mut src = BytesMut::from(&[0x82, 127, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF][..]);
        assert!(matches!(
            Decoder::new(None).decode(&mut src),
            Err(WebSocketError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_pending_payload_does_not_reserve_declared_length() {
        // 2^40 bytes declared, only the header delivered.
        let mut src = BytesMut::from(&[0x82, 127, 0, 0, 0x01, 0, 0, 0, 0, 0, 1, 2][..]);
        let mut decoder = Decoder::new(None);
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
        assert!(src.capacity() < 1024);
        assert_eq!(&src[..], &[1, 2]);
    }

    #[test]
    fn test_incomplete_header_consumes_nothing() {
        let mut src = BytesMut::from(&[0x82, 126, 0x01][..]);
        assert_eq!(Decoder::new(None).decode(&mut src).unwrap(), None);
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn test_close_and_timestamp_payloads() {
        let mut dst = BytesMut::new();
        Encoder::encode_with_mask(
            &Outgoing::close(CloseResult::new(1000u16, "bye")),
            None,
            &mut dst,
        );
        assert_eq!(&dst[..], b"\x88\x05\x03\xE8bye");

        let at = std::time::UNIX_EPOCH + std::time::Duration::from_millis(1_500);
        let mut dst = BytesMut::new();
        Encoder::encode_with_mask(&Outgoing::keepalive(at), Some([0, 0, 0, 0]), &mut dst);
        let frame = decode_all(dst);
        assert_eq!(frame.opcode(), OpCode::Ping);
        assert_eq!(frame.payload(), &Bytes::from_static(b"1.500"));
    }

    #[test]
    fn test_tokio_encoder_uses_masking() {
        let mut encoder = Encoder::new(Masking::Fixed([0xFF; 4]));
        let mut dst = BytesMut::new();
        encoder.encode(Frame::binary(vec![0x0F]), &mut dst).unwrap();
        assert_eq!(&dst[..], &[0x82, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xF0]);
    }
}
