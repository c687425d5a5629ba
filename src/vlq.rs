//! The variable-length quantity codec: MIDI's integers stored as 7 bits per
//! byte, big-endian, with the top bit of each byte flagging continuation.
//!
//! Values are at most 28 bits (4 encoded bytes), and the canonical encoding
//! is the shortest one: no leading all-zero continuation bytes.

use crate::prelude::*;

/// The largest value a variable-length quantity can encode.
pub const MAX: u32 = 0x0FFF_FFFF;

/// Decode a variable-length quantity from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed, which is also the
/// length [`encode`](fn.encode.html) would produce for canonical input.
pub fn decode(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut raw = bytes;
    let value = read(&mut raw)?;
    Ok((value.as_int(), bytes.len() - raw.len()))
}

/// Encode `value` in its minimal-length canonical form.
///
/// Fails with [`ErrorKind::ValueOutOfRange`](enum.ErrorKind.html) if `value`
/// exceeds 28 bits.
pub fn encode(value: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4);
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Append the minimal-length canonical encoding of `value` to `out`.
pub fn encode_into(value: u32, out: &mut Vec<u8>) -> Result<()> {
    let value = u28::try_from(value).ok_or(ErrorKind::ValueOutOfRange(
        "variable-length quantity exceeds 28 bits",
    ))?;
    write(value, out);
    Ok(())
}

/// Read a variable-length quantity, advancing the cursor past it.
pub(crate) fn read(raw: &mut &[u8]) -> StdResult<u28, ErrorKind> {
    let mut int: u32 = 0;
    for _ in 0..4 {
        let byte = match raw.split_checked(1) {
            Some(slice) => slice[0],
            None => {
                return Err(ErrorKind::TruncatedTrack(
                    "eof inside a variable-length quantity",
                ))
            }
        };
        int = (int << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            // At most 4 reads of 7 bits each, so the value is guaranteed to
            // fit in 28 bits.
            return Ok(u28::new(int));
        }
    }
    Err(ErrorKind::MalformedVlq)
}

/// Write the canonical encoding of `value` into `out`.
pub(crate) fn write(value: u28, out: &mut Vec<u8>) {
    let int = value.as_int();
    let mut skipping = true;
    for i in (0..4).rev() {
        let byte = ((int >> (i * 7)) & 0x7F) as u8;
        if skipping && byte == 0 && i != 0 {
            // Leading zero septets are not part of the canonical form.
        } else {
            skipping = false;
            out.push(if i == 0 { byte } else { byte | 0x80 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_vectors() {
        // The example table from the SMF specification.
        let vectors: &[(u32, &[u8])] = &[
            (0x0000_0000, &[0x00]),
            (0x0000_0040, &[0x40]),
            (0x0000_007F, &[0x7F]),
            (0x0000_0080, &[0x81, 0x00]),
            (0x0000_2000, &[0xC0, 0x00]),
            (0x0000_3FFF, &[0xFF, 0x7F]),
            (0x0000_4000, &[0x81, 0x80, 0x00]),
            (0x001F_FFFF, &[0xFF, 0xFF, 0x7F]),
            (0x0020_0000, &[0x81, 0x80, 0x80, 0x00]),
            (0x0FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for &(value, bytes) in vectors {
            assert_eq!(encode(value).unwrap(), bytes.to_vec());
            assert_eq!(decode(bytes).unwrap(), (value, bytes.len()));
        }
    }

    #[test]
    fn roundtrip() {
        let mut value = 1;
        while value <= MAX {
            let bytes = encode(value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), (value, bytes.len()));
            value = value.wrapping_mul(3) + 1;
        }
    }

    #[test]
    fn rejects_oversized_values() {
        for &value in &[MAX + 1, u32::max_value()] {
            let err = encode(value).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::ValueOutOfRange(_)));
        }
    }

    #[test]
    fn rejects_unterminated_quantities() {
        let err = decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedVlq));
    }

    #[test]
    fn rejects_eof_mid_quantity() {
        let err = decode(&[0x81, 0x80]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::TruncatedTrack(_)));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        assert_eq!(decode(&[0x81, 0x00, 0x55, 0x66]).unwrap(), (0x80, 2));
    }
}
