//! Payload masking (RFC 6455 Section 5.3).
//!
//! Masking XORs every payload byte with one byte of a 4-byte key, cycling
//! through the key. The operation is its own inverse, so the same functions
//! mask outgoing payloads and unmask incoming ones.

use bytes::BytesMut;

/// Mask/unmask a buffer in place, starting at key index 0.
///
/// Small buffers take the 32-bit word path, larger ones the 64-bit path.
/// Empty buffers are left untouched.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    if buf.len() <= 128 {
        apply_mask_fast32(buf, mask);
    } else {
        apply_mask_fast64(buf, mask);
    }
}

/// Mask/unmask one chunk of a payload that is processed in pieces.
///
/// `offset` is the position of `buf` within the whole payload (only its
/// value modulo 4 matters). Returns the offset to pass with the next chunk,
/// so masking chunk by chunk gives the same bytes as masking the whole
/// payload at once.
#[inline]
pub fn apply_mask_offset(buf: &mut [u8], mask: [u8; 4], offset: usize) -> usize {
    let shift = offset & 3;
    let rotated = if shift == 0 {
        mask
    } else {
        let mut rotated = mask;
        rotated.rotate_left(shift);
        rotated
    };
    apply_mask(buf, rotated);
    (shift + buf.len()) & 3
}

/// Returns a masked copy of a payload that cannot be modified in place.
pub fn masked(payload: &[u8], mask: [u8; 4]) -> BytesMut {
    let mut out = BytesMut::from(payload);
    apply_mask(&mut out, mask);
    out
}

/// A safe unoptimized mask application.
#[inline(always)]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Mask application over 4-byte words.
#[doc(hidden)]
#[inline(always)]
pub fn apply_mask_fast32(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    // SAFETY: every bit pattern is a valid u32.
    let (prefix, words, suffix) = unsafe { buf.align_to_mut::<u32>() };
    apply_mask_fallback(prefix, mask);

    let head = prefix.len() & 3;
    let mask_u32 = if head > 0 {
        if cfg!(target_endian = "big") {
            mask_u32.rotate_left(8 * head as u32)
        } else {
            mask_u32.rotate_right(8 * head as u32)
        }
    } else {
        mask_u32
    };

    for word in words.iter_mut() {
        *word ^= mask_u32;
    }

    apply_mask_fallback(suffix, mask_u32.to_ne_bytes());
}

/// Mask application over 8-byte words, for larger buffers.
#[doc(hidden)]
#[inline(always)]
pub fn apply_mask_fast64(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mask_u64 = (u64::from(mask_u32) << 32) | u64::from(mask_u32);

    // SAFETY: every bit pattern is a valid u64.
    let (prefix, words, suffix) = unsafe { buf.align_to_mut::<u64>() };
    apply_mask_fallback(prefix, mask);

    let head = prefix.len() & 3;
    let mask_u64 = if head > 0 {
        if cfg!(target_endian = "big") {
            mask_u64.rotate_left(8 * head as u32)
        } else {
            mask_u64.rotate_right(8 * head as u32)
        }
    } else {
        mask_u64
    };

    for word in words.iter_mut() {
        *word ^= mask_u64;
    }

    let bytes = mask_u64.to_ne_bytes();
    apply_mask_fallback(suffix, [bytes[0], bytes[1], bytes[2], bytes[3]]);
}
