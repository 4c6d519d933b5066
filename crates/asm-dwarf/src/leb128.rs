//! LEB128 variable-length integers.
//!
//! Every writer has a matching `*_len` function that computes the encoded
//! size without touching a buffer; the line-program codec relies on the two
//! agreeing exactly.

use alloc::vec::Vec;

/// Append the unsigned LEB128 encoding of `value` to `out`.
#[inline]
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append the signed LEB128 encoding of `value` to `out`.
#[inline]
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Encoded size of `value` as unsigned LEB128.
#[inline]
pub fn uleb128_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Encoded size of `value` as signed LEB128.
#[inline]
pub fn sleb128_len(mut value: i64) -> usize {
    let mut len = 0;
    loop {
        let byte = value & 0x7F;
        value >>= 7;
        len += 1;
        if (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0) {
            return len;
        }
    }
}

/// Decode an unsigned LEB128 value at `*pos`, advancing `pos`.
///
/// Returns `None` on truncated input or when the value overflows 64 bits.
pub fn read_uleb128(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        result |= u64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Some(result);
        }
    }
}

/// Decode a signed LEB128 value at `*pos`, advancing `pos`.
pub fn read_sleb128(bytes: &[u8], pos: &mut usize) -> Option<i64> {
    let mut result = 0i64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        result |= i64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            return Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn uleb(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_uleb128(&mut out, v);
        out
    }

    fn sleb(v: i64) -> Vec<u8> {
        let mut out = Vec::new();
        write_sleb128(&mut out, v);
        out
    }

    #[test]
    fn uleb_known_vectors() {
        assert_eq!(uleb(0), vec![0x00]);
        assert_eq!(uleb(127), vec![0x7F]);
        assert_eq!(uleb(128), vec![0x80, 0x01]);
        assert_eq!(uleb(624_485), vec![0xE5, 0x8E, 0x26]);
    }

    #[test]
    fn sleb_known_vectors() {
        assert_eq!(sleb(0), vec![0x00]);
        assert_eq!(sleb(2), vec![0x02]);
        assert_eq!(sleb(-2), vec![0x7E]);
        assert_eq!(sleb(63), vec![0x3F]);
        assert_eq!(sleb(64), vec![0xC0, 0x00]);
        assert_eq!(sleb(-64), vec![0x40]);
        assert_eq!(sleb(-65), vec![0xBF, 0x7F]);
        assert_eq!(sleb(1000), vec![0xE8, 0x07]);
        assert_eq!(sleb(-123_456), vec![0xC0, 0xBB, 0x78]);
    }

    #[test]
    fn lengths_match_writers() {
        for v in [0u64, 1, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(uleb128_len(v), uleb(v).len(), "uleb {v}");
        }
        for v in [0i64, 63, 64, -64, -65, 1000, -1000, i64::MAX, i64::MIN] {
            assert_eq!(sleb128_len(v), sleb(v).len(), "sleb {v}");
        }
    }

    #[test]
    fn readers_invert_writers() {
        for v in [0u64, 300, u64::MAX] {
            let bytes = uleb(v);
            let mut pos = 0;
            assert_eq!(read_uleb128(&bytes, &mut pos), Some(v));
            assert_eq!(pos, bytes.len());
        }
        for v in [0i64, -1, 1000, -1000, i64::MIN, i64::MAX] {
            let bytes = sleb(v);
            let mut pos = 0;
            assert_eq!(read_sleb128(&bytes, &mut pos), Some(v));
            assert_eq!(pos, bytes.len());
        }
    }

    #[test]
    fn truncated_input() {
        let mut pos = 0;
        assert_eq!(read_uleb128(&[0x80], &mut pos), None);
        let mut pos = 0;
        assert_eq!(read_sleb128(&[], &mut pos), None);
    }
}
