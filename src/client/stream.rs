//! Length-prefixed record framing inside the snappy stream.
//!
//! Each record is `u16 len | fingerprint bytes | i64 ms | f64 value`, every
//! integer and float little-endian. A zero timestamp asks sonar to assign
//! its own.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Writes one record.
pub fn write_record<W: Write>(w: &mut W, lfm: &str, ms: i64, value: f64) -> io::Result<()> {
    let len = u16::try_from(lfm.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("fingerprint of {} bytes overflows the u16 prefix", lfm.len()),
        )
    })?;
    w.write_u16::<LittleEndian>(len)?;
    w.write_all(lfm.as_bytes())?;
    w.write_i64::<LittleEndian>(ms)?;
    w.write_f64::<LittleEndian>(value)?;
    Ok(())
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub lfm: String,
    pub ms: i64,
    pub value: f64,
}

/// Reads one record, or `None` at a clean end of stream.
pub fn read_record<R: Read>(r: &mut R) -> io::Result<Option<Record>> {
    let len = match r.read_u16::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut buf = vec![0u8; usize::from(len)];
    r.read_exact(&mut buf)?;
    let lfm = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let ms = r.read_i64::<LittleEndian>()?;
    let value = r.read_f64::<LittleEndian>()?;
    Ok(Some(Record { lfm, ms, value }))
}

/// Decompresses a push body and decodes every record in it.
pub fn decode_body(body: &[u8]) -> io::Result<Vec<Record>> {
    let mut reader = snap::read::FrameDecoder::new(body);
    let mut out = Vec::new();
    while let Some(record) = read_record(&mut reader)? {
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let mut buf = Vec::new();
        write_record(&mut buf, "ab", 0, 1.0).unwrap();
        assert_eq!(&buf[..2], &[2, 0]);
        assert_eq!(&buf[2..4], b"ab");
        assert_eq!(&buf[4..12], &0i64.to_le_bytes());
        assert_eq!(&buf[12..20], &1.0f64.to_le_bytes());
        assert_eq!(buf.len(), 20);
    }

    #[test]
    fn test_oversized_fingerprint_rejected() {
        let huge = "x".repeat(usize::from(u16::MAX) + 1);
        let err = write_record(&mut Vec::new(), &huge, 0, 0.0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_decode_snappy_body() {
        let mut enc = snap::write::FrameEncoder::new(Vec::new());
        write_record(&mut enc, "m\0a\0b", 1_700_000_000_000, 2.5).unwrap();
        write_record(&mut enc, "n", 0, -1.0).unwrap();
        let body = enc.into_inner().unwrap();

        let records = decode_body(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].lfm, "m\0a\0b");
        assert_eq!(records[0].ms, 1_700_000_000_000);
        assert_eq!(records[1].value, -1.0);
    }
}
