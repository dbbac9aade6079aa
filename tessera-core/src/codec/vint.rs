//! Variable-length integer primitives shared by posting codecs.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

/// Write variable-length integer (1-10 bytes)
pub(crate) fn write_vint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(());
        } else {
            writer.write_u8(byte | 0x80)?;
        }
    }
}

/// Read variable-length integer
pub(crate) fn read_vint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint too long",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_roundtrip() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_vint(&mut buf, value).unwrap();
            let decoded = read_vint(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_vint_truncated() {
        let buf = [0x80u8];
        assert!(read_vint(&mut buf.as_ref()).is_err());
    }
}
