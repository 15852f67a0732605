//! Directory record and timestamp encoding.
//!
//! ECMA-119 stores most numbers "both-endian": little-endian immediately
//! followed by big-endian.

use time::OffsetDateTime;

use super::FLAG_DIRECTORY;

/// Fixed part of a directory record, before the file identifier.
pub const RECORD_HEADER_LEN: usize = 33;

pub fn put_both_u16(buf: &mut [u8], value: u16) {
    buf[0..2].copy_from_slice(&value.to_le_bytes());
    buf[2..4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_both_u32(buf: &mut [u8], value: u32) {
    buf[0..4].copy_from_slice(&value.to_le_bytes());
    buf[4..8].copy_from_slice(&value.to_be_bytes());
}

pub fn read_le_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

pub fn read_le_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

/// Copy `text` into `buf`, padding the rest with `fill`.
pub fn put_padded(buf: &mut [u8], text: &str, fill: u8) {
    buf.fill(fill);
    let bytes = text.as_bytes();
    let len = bytes.len().min(buf.len());
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// 7-byte recording date used in directory records (always UTC).
pub fn record_datetime(ts: OffsetDateTime) -> [u8; 7] {
    let ts = ts.to_offset(time::UtcOffset::UTC);
    let year = (ts.year() - 1900).clamp(0, 255) as u8;
    [
        year,
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        0,
    ]
}

/// 17-byte volume descriptor date: `YYYYMMDDHHMMSScc` digits plus GMT offset.
pub fn volume_datetime(ts: OffsetDateTime) -> [u8; 17] {
    let ts = ts.to_offset(time::UtcOffset::UTC);
    let digits = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
        ts.year().clamp(0, 9999),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.millisecond() / 10
    );
    let mut out = [0u8; 17];
    out[..16].copy_from_slice(&digits.as_bytes()[..16]);
    out
}

/// "Not specified" volume date.
pub fn unset_volume_datetime() -> [u8; 17] {
    let mut out = [b'0'; 17];
    out[16] = 0;
    out
}

/// Encoded length of a record with the given identifier and system use area.
/// Records are always an even number of bytes.
pub fn record_len(identifier_len: usize, system_use_len: usize) -> usize {
    let mut len = RECORD_HEADER_LEN + identifier_len;
    if len % 2 == 1 {
        len += 1;
    }
    len += system_use_len;
    if len % 2 == 1 {
        len += 1;
    }
    len
}

/// Fields of a directory record to be encoded.
pub struct RecordSpec<'a> {
    pub extent: u32,
    pub data_len: u32,
    pub flags: u8,
    pub recorded: [u8; 7],
    pub identifier: &'a [u8],
    pub system_use: &'a [u8],
}

pub fn encode_record(spec: &RecordSpec<'_>) -> Vec<u8> {
    let len = record_len(spec.identifier.len(), spec.system_use.len());
    let mut rec = vec![0u8; len];
    rec[0] = len as u8;
    put_both_u32(&mut rec[2..10], spec.extent);
    put_both_u32(&mut rec[10..18], spec.data_len);
    rec[18..25].copy_from_slice(&spec.recorded);
    rec[25] = spec.flags;
    put_both_u16(&mut rec[28..32], 1);
    rec[32] = spec.identifier.len() as u8;
    rec[33..33 + spec.identifier.len()].copy_from_slice(spec.identifier);
    let mut su_start = RECORD_HEADER_LEN + spec.identifier.len();
    if su_start % 2 == 1 {
        su_start += 1;
    }
    rec[su_start..su_start + spec.system_use.len()].copy_from_slice(spec.system_use);
    rec
}

/// A decoded directory record borrowing from the directory extent.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub extent: u32,
    pub data_len: u32,
    pub flags: u8,
    pub identifier: &'a [u8],
    pub system_use: &'a [u8],
}

impl<'a> RawRecord<'a> {
    /// Decode one record from the start of `buf`.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let len = *buf.first()? as usize;
        if len < RECORD_HEADER_LEN + 1 || len > buf.len() {
            return None;
        }
        let id_len = buf[32] as usize;
        let id_end = RECORD_HEADER_LEN + id_len;
        if id_end > len {
            return None;
        }
        let su_start = if id_end % 2 == 1 { id_end + 1 } else { id_end };
        let system_use = if su_start < len { &buf[su_start..len] } else { &[] };
        Some(Self {
            extent: read_le_u32(&buf[2..6]),
            data_len: read_le_u32(&buf[10..14]),
            flags: buf[25],
            identifier: &buf[33..id_end],
            system_use,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// `.` and `..` are recorded as the single bytes 0x00 and 0x01.
    pub fn is_self_or_parent(&self) -> bool {
        self.identifier == [0] || self.identifier == [1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_both_endian() {
        let mut buf = [0u8; 8];
        put_both_u32(&mut buf, 0x0102_0304);
        assert_eq!(buf, [4, 3, 2, 1, 1, 2, 3, 4]);
    }

    #[test]
    fn test_record_len_is_even() {
        // odd identifier: header + id is already even
        assert_eq!(record_len(1, 0), 34);
        // even identifier gets a pad byte
        assert_eq!(record_len(10, 0), 44);
        // odd system use gets a trailing pad byte
        assert_eq!(record_len(1, 5), 40);
    }

    #[test]
    fn test_encode_then_parse_record() {
        let rec = encode_record(&RecordSpec {
            extent: 40,
            data_len: 1234,
            flags: 0,
            recorded: record_datetime(datetime!(2024-05-06 07:08:09 UTC)),
            identifier: b"VMLINUZ.;1",
            system_use: b"NM\x0c\x01\x00vmlinuz",
        });
        assert_eq!(rec.len() % 2, 0);
        let parsed = RawRecord::parse(&rec).unwrap();
        assert_eq!(parsed.extent, 40);
        assert_eq!(parsed.data_len, 1234);
        assert_eq!(parsed.identifier, b"VMLINUZ.;1");
        assert!(parsed.system_use.starts_with(b"NM"));
        assert!(!parsed.is_directory());
    }

    #[test]
    fn test_datetimes() {
        let ts = datetime!(2024-05-06 07:08:09 UTC);
        assert_eq!(record_datetime(ts), [124, 5, 6, 7, 8, 9, 0]);
        assert_eq!(&volume_datetime(ts)[..16], b"2024050607080900");
        assert_eq!(volume_datetime(ts)[16], 0);
    }
}
