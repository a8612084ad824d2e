//! Byte-level codecs shared by the KLV and metadata layers.
//!
//! All multi-byte scalars in MXF are big-endian. Lengths at file scope
//! use BER encoding; lengths inside local sets use fixed 2-byte fields.

use crate::error::{MxfError, Result};
use crate::types::Timestamp;
use crate::ul::Ul;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};
use uuid::Uuid;

/// Largest length the format can carry: lengths are signed 64-bit.
pub const MAX_LENGTH: u64 = i64::MAX as u64;

/// Decode a BER length from a reader.
///
/// Returns the length and the number of bytes consumed. A first byte
/// below 0x80 is the length itself; 0x8n means the next n bytes hold
/// the length big-endian, with 1 <= n <= 8.
pub fn read_ber_length<R: Read>(reader: &mut R) -> Result<(u64, usize)> {
    let first = match reader.read_u8() {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(MxfError::MalformedLength("no length byte".into()))
        }
        Err(e) => return Err(e.into()),
    };

    if first < 0x80 {
        return Ok((first as u64, 1));
    }

    let count = (first & 0x7f) as usize;
    if count == 0 {
        return Err(MxfError::MalformedLength(
            "indefinite (0x80) length not supported".into(),
        ));
    }
    if count > 8 {
        return Err(MxfError::MalformedLength(format!(
            "length-of-length {} exceeds 8",
            count
        )));
    }

    let mut buf = [0u8; 8];
    if let Err(e) = reader.read_exact(&mut buf[..count]) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Err(MxfError::MalformedLength("truncated length field".into()));
        }
        return Err(e.into());
    }

    let mut length: u64 = 0;
    for byte in &buf[..count] {
        length = (length << 8) | (*byte as u64);
    }

    if length > MAX_LENGTH {
        return Err(MxfError::LengthOverflow {
            length,
            limit: MAX_LENGTH,
        });
    }

    Ok((length, 1 + count))
}

/// Decode a BER length from a byte slice.
pub fn decode_ber_length(data: &[u8]) -> Result<(u64, usize)> {
    let mut cursor = data;
    read_ber_length(&mut cursor)
}

/// Encode a length as BER using the minimum width.
pub fn encode_ber_length(length: u64) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }

    let count = ((64 - length.leading_zeros() as usize) + 7) / 8;
    let mut out = Vec::with_capacity(1 + count);
    out.push(0x80 | count as u8);
    for i in (0..count).rev() {
        out.push((length >> (8 * i)) as u8);
    }
    out
}

/// Encode a length as BER using exactly `size` bytes in total.
///
/// Widths larger than the minimum pad with leading zero bytes, which
/// is legal BER. `size` of 1 forces the short form.
pub fn encode_ber_length_exact(length: u64, size: usize) -> Result<Vec<u8>> {
    if size == 0 || size > 9 {
        return Err(MxfError::MalformedLength(format!(
            "BER length field of {} bytes is not encodable",
            size
        )));
    }

    if size == 1 {
        if length >= 0x80 {
            return Err(MxfError::LengthOverflow {
                length,
                limit: 0x7f,
            });
        }
        return Ok(vec![length as u8]);
    }

    let count = size - 1;
    let limit = if count >= 8 {
        MAX_LENGTH
    } else {
        (1u64 << (8 * count)) - 1
    };
    if length > limit {
        return Err(MxfError::LengthOverflow { length, limit });
    }

    let mut out = Vec::with_capacity(size);
    out.push(0x80 | count as u8);
    for i in (0..count).rev() {
        out.push((length >> (8 * i)) as u8);
    }
    Ok(out)
}

/// Number of bytes a minimum-width BER encoding of `length` occupies.
pub fn ber_length_size(length: u64) -> usize {
    if length < 0x80 {
        1
    } else {
        1 + ((64 - length.leading_zeros() as usize) + 7) / 8
    }
}

/// Decode a fixed-width big-endian unsigned length of 1, 2 or 4 bytes.
pub fn read_fixed_length<R: Read>(reader: &mut R, width: usize) -> Result<u64> {
    let value = match width {
        1 => reader.read_u8()? as u64,
        2 => reader.read_u16::<BigEndian>()? as u64,
        4 => reader.read_u32::<BigEndian>()? as u64,
        _ => {
            return Err(MxfError::MalformedLength(format!(
                "unsupported fixed length width {}",
                width
            )))
        }
    };
    Ok(value)
}

/// Encode a fixed-width big-endian unsigned length of 1, 2 or 4 bytes.
pub fn write_fixed_length<W: Write>(writer: &mut W, length: u64, width: usize) -> Result<()> {
    let limit = match width {
        1 => u8::MAX as u64,
        2 => u16::MAX as u64,
        4 => u32::MAX as u64,
        _ => {
            return Err(MxfError::MalformedLength(format!(
                "unsupported fixed length width {}",
                width
            )))
        }
    };
    if length > limit {
        return Err(MxfError::LengthOverflow { length, limit });
    }

    match width {
        1 => writer.write_u8(length as u8)?,
        2 => writer.write_u16::<BigEndian>(length as u16)?,
        _ => writer.write_u32::<BigEndian>(length as u32)?,
    }
    Ok(())
}

/// Read a 16-byte universal label.
pub fn read_ul<R: Read>(reader: &mut R) -> Result<Ul> {
    let mut bytes = [0u8; 16];
    reader.read_exact(&mut bytes)?;
    Ok(Ul(bytes))
}

/// Write a 16-byte universal label.
pub fn write_ul<W: Write>(writer: &mut W, ul: &Ul) -> Result<()> {
    writer.write_all(ul.as_bytes())?;
    Ok(())
}

/// Read a 16-byte UUID.
pub fn read_uuid<R: Read>(reader: &mut R) -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    reader.read_exact(&mut bytes)?;
    Ok(Uuid::from_bytes(bytes))
}

/// Write a 16-byte UUID.
pub fn write_uuid<W: Write>(writer: &mut W, uuid: &Uuid) -> Result<()> {
    writer.write_all(uuid.as_bytes())?;
    Ok(())
}

/// Read an 8-byte timestamp.
pub fn read_timestamp<R: Read>(reader: &mut R) -> Result<Timestamp> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(Timestamp::from_bytes(&bytes).unwrap_or_default())
}

/// Write an 8-byte timestamp.
pub fn write_timestamp<W: Write>(writer: &mut W, ts: &Timestamp) -> Result<()> {
    writer.write_all(&ts.to_bytes())?;
    Ok(())
}

/// Read a batch header: 4-byte element count then 4-byte element size.
pub fn read_batch_header<R: Read>(reader: &mut R) -> Result<(u32, u32)> {
    let count = reader.read_u32::<BigEndian>()?;
    let size = reader.read_u32::<BigEndian>()?;
    Ok((count, size))
}

/// Write a batch header: 4-byte element count then 4-byte element size.
pub fn write_batch_header<W: Write>(writer: &mut W, count: u32, size: u32) -> Result<()> {
    writer.write_u32::<BigEndian>(count)?;
    writer.write_u32::<BigEndian>(size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ber_short_form() {
        assert_eq!(encode_ber_length(0), vec![0x00]);
        assert_eq!(encode_ber_length(127), vec![0x7f]);

        let (len, size) = decode_ber_length(&[0x00]).unwrap();
        assert_eq!((len, size), (0, 1));
    }

    #[test]
    fn test_ber_long_form() {
        assert_eq!(encode_ber_length(128), vec![0x81, 0x80]);
        assert_eq!(encode_ber_length(65535), vec![0x82, 0xff, 0xff]);

        let (len, size) = decode_ber_length(&[0x82, 0x03, 0xe8]).unwrap();
        assert_eq!((len, size), (1000, 3));
    }

    #[test]
    fn test_ber_roundtrip_large() {
        for length in [0x80u64, 0xffff, 0x0123_4567, MAX_LENGTH] {
            let encoded = encode_ber_length(length);
            let (decoded, consumed) = decode_ber_length(&encoded).unwrap();
            assert_eq!(decoded, length);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_ber_indefinite_rejected() {
        assert!(matches!(
            decode_ber_length(&[0x80]),
            Err(MxfError::MalformedLength(_))
        ));
    }

    #[test]
    fn test_ber_width_overflow_rejected() {
        // 9-byte length-of-length
        assert!(matches!(
            decode_ber_length(&[0x89, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            Err(MxfError::MalformedLength(_))
        ));
    }

    #[test]
    fn test_ber_signed_overflow_rejected() {
        // 2^64 - 1 does not fit a signed length
        let input = [0x88, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_ber_length(&input),
            Err(MxfError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_ber_truncated_rejected() {
        assert!(matches!(
            decode_ber_length(&[0x82, 0x01]),
            Err(MxfError::MalformedLength(_))
        ));
        assert!(matches!(
            decode_ber_length(&[]),
            Err(MxfError::MalformedLength(_))
        ));
    }

    #[test]
    fn test_ber_exact_width() {
        // Padded widths are legal
        let encoded = encode_ber_length_exact(5, 4).unwrap();
        assert_eq!(encoded, vec![0x83, 0x00, 0x00, 0x05]);
        let (decoded, consumed) = decode_ber_length(&encoded).unwrap();
        assert_eq!((decoded, consumed), (5, 4));

        // Short form on request
        assert_eq!(encode_ber_length_exact(5, 1).unwrap(), vec![0x05]);

        // Value too big for the field
        assert!(matches!(
            encode_ber_length_exact(0x80, 1),
            Err(MxfError::LengthOverflow { .. })
        ));
        assert!(matches!(
            encode_ber_length_exact(0x1_0000, 3),
            Err(MxfError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_ber_length_size() {
        assert_eq!(ber_length_size(0), 1);
        assert_eq!(ber_length_size(0x7f), 1);
        assert_eq!(ber_length_size(0x80), 2);
        assert_eq!(ber_length_size(0xffff), 3);
        assert_eq!(ber_length_size(MAX_LENGTH), 9);
    }

    #[test]
    fn test_fixed_length() {
        let mut buf = Vec::new();
        write_fixed_length(&mut buf, 0xabcd, 2).unwrap();
        assert_eq!(buf, vec![0xab, 0xcd]);

        let mut cursor = &buf[..];
        assert_eq!(read_fixed_length(&mut cursor, 2).unwrap(), 0xabcd);

        assert!(matches!(
            write_fixed_length(&mut Vec::new(), 0x100, 1),
            Err(MxfError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_batch_header() {
        let mut buf = Vec::new();
        write_batch_header(&mut buf, 2, 18).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, 0, 0, 0, 18]);

        let mut cursor = &buf[..];
        assert_eq!(read_batch_header(&mut cursor).unwrap(), (2, 18));
    }
}
