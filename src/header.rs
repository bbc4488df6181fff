//! Per-entry ZIP records: the local file header that precedes each payload and
//! the central directory header that indexes it.
//!
//! Both are little-endian, fixed-size prefixes followed by variable-length
//! name / extra / comment fields.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::error::ArchiveError;

pub const LOCAL_HEADER_SIGNATURE:   u32 = 0x0403_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;

/// Fixed part of a local file header, before name and extra field.
pub const LOCAL_HEADER_SIZE:   u64 = 30;
/// Fixed part of a central directory header.
pub const CENTRAL_HEADER_SIZE: u64 = 46;

pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_UTF8:      u16 = 0x0800;

/// Unix host, ZIP version 2.0.
pub const VERSION_MADE_BY:      u16 = 0x0314;
pub const VERSION_NEEDED_STORE: u16 = 10;
pub const VERSION_NEEDED_DEFLATE: u16 = 20;

// ── DOS timestamps ───────────────────────────────────────────────────────────

/// MS-DOS packed date and time, two-second resolution, years 1980..=2107.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime { time: 0, date: (1 << 5) | 1 };

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::EPOCH;
        }
        if dt.year() > 2107 {
            return DosDateTime {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }
        DosDateTime {
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2),
            date: (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
        }
    }

    /// Seconds since the Unix epoch, interpreted as UTC.
    pub fn from_unix_timestamp(secs: i64) -> Self {
        match chrono::DateTime::from_timestamp(secs, 0) {
            Some(dt) => Self::from_naive(dt.naive_utc()),
            None     => Self::EPOCH,
        }
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year  = 1980 + i32::from(self.date >> 9);
        let month = u32::from((self.date >> 5) & 0x0f);
        let day   = u32::from(self.date & 0x1f);
        let hour  = u32::from(self.time >> 11);
        let min   = u32::from((self.time >> 5) & 0x3f);
        let sec   = u32::from(self.time & 0x1f) * 2;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, min, sec)
    }
}

impl Default for DosDateTime {
    fn default() -> Self { Self::EPOCH }
}

// ── Local file header ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed:    u16,
    pub flags:             u16,
    pub method:            u16,
    pub modified:          DosDateTime,
    pub crc32:             u32,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
    pub name:              Vec<u8>,
    pub extra:             Vec<u8>,
}

impl LocalFileHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(LOCAL_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ArchiveError> {
        let signature = reader.read_u32::<LittleEndian>().map_err(truncated("local header"))?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(ArchiveError::format(format!(
                "bad local header signature {signature:#010x}"
            )));
        }
        let mut fixed = [0u8; LOCAL_HEADER_SIZE as usize - 4];
        reader.read_exact(&mut fixed).map_err(truncated("local header"))?;
        let mut f = &fixed[..];
        let version_needed    = f.read_u16::<LittleEndian>()?;
        let flags             = f.read_u16::<LittleEndian>()?;
        let method            = f.read_u16::<LittleEndian>()?;
        let time              = f.read_u16::<LittleEndian>()?;
        let date              = f.read_u16::<LittleEndian>()?;
        let crc32             = f.read_u32::<LittleEndian>()?;
        let compressed_size   = f.read_u32::<LittleEndian>()?;
        let uncompressed_size = f.read_u32::<LittleEndian>()?;
        let name_len          = f.read_u16::<LittleEndian>()?;
        let extra_len         = f.read_u16::<LittleEndian>()?;

        let mut name = vec![0u8; name_len as usize];
        reader.read_exact(&mut name).map_err(truncated("local header name"))?;
        let mut extra = vec![0u8; extra_len as usize];
        reader.read_exact(&mut extra).map_err(truncated("local header extra field"))?;

        Ok(Self {
            version_needed,
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Bytes from the header's first byte to the first payload byte.
    pub fn size(&self) -> u64 {
        LOCAL_HEADER_SIZE + self.name.len() as u64 + self.extra.len() as u64
    }
}

// ── Central directory header ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by:   u16,
    pub version_needed:    u16,
    pub flags:             u16,
    pub method:            u16,
    pub modified:          DosDateTime,
    pub crc32:             u32,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
    pub disk_start:        u16,
    pub internal_attr:     u16,
    pub external_attr:     u32,
    pub header_offset:     u32,
    pub name:              Vec<u8>,
    pub extra:             Vec<u8>,
    pub comment:           Vec<u8>,
}

impl CentralDirectoryHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(CENTRAL_HEADER_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.modified.time)?;
        writer.write_u16::<LittleEndian>(self.modified.date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.disk_start)?;
        writer.write_u16::<LittleEndian>(self.internal_attr)?;
        writer.write_u32::<LittleEndian>(self.external_attr)?;
        writer.write_u32::<LittleEndian>(self.header_offset)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ArchiveError> {
        let signature = reader.read_u32::<LittleEndian>().map_err(truncated("central directory"))?;
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(ArchiveError::format(format!(
                "bad central directory signature {signature:#010x}"
            )));
        }
        let mut fixed = [0u8; CENTRAL_HEADER_SIZE as usize - 4];
        reader.read_exact(&mut fixed).map_err(truncated("central directory"))?;
        let mut f = &fixed[..];
        let version_made_by   = f.read_u16::<LittleEndian>()?;
        let version_needed    = f.read_u16::<LittleEndian>()?;
        let flags             = f.read_u16::<LittleEndian>()?;
        let method            = f.read_u16::<LittleEndian>()?;
        let time              = f.read_u16::<LittleEndian>()?;
        let date              = f.read_u16::<LittleEndian>()?;
        let crc32             = f.read_u32::<LittleEndian>()?;
        let compressed_size   = f.read_u32::<LittleEndian>()?;
        let uncompressed_size = f.read_u32::<LittleEndian>()?;
        let name_len          = f.read_u16::<LittleEndian>()?;
        let extra_len         = f.read_u16::<LittleEndian>()?;
        let comment_len       = f.read_u16::<LittleEndian>()?;
        let disk_start        = f.read_u16::<LittleEndian>()?;
        let internal_attr     = f.read_u16::<LittleEndian>()?;
        let external_attr     = f.read_u32::<LittleEndian>()?;
        let header_offset     = f.read_u32::<LittleEndian>()?;

        let mut name = vec![0u8; name_len as usize];
        reader.read_exact(&mut name).map_err(truncated("central directory name"))?;
        let mut extra = vec![0u8; extra_len as usize];
        reader.read_exact(&mut extra).map_err(truncated("central directory extra field"))?;
        let mut comment = vec![0u8; comment_len as usize];
        reader.read_exact(&mut comment).map_err(truncated("central directory comment"))?;

        Ok(Self {
            version_made_by,
            version_needed,
            flags,
            method,
            modified: DosDateTime { time, date },
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attr,
            external_attr,
            header_offset,
            name,
            extra,
            comment,
        })
    }

    pub fn size(&self) -> u64 {
        CENTRAL_HEADER_SIZE
            + self.name.len() as u64
            + self.extra.len() as u64
            + self.comment.len() as u64
    }
}

/// Maps an unexpected EOF while parsing `what` to a format error.
pub(crate) fn truncated(what: &'static str) -> impl Fn(io::Error) -> ArchiveError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::format(format!("truncated {what}"))
        } else {
            ArchiveError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn dos_time_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2021, 7, 14).unwrap().and_hms_opt(13, 45, 58).unwrap();
        let dos = DosDateTime::from_naive(dt);
        assert_eq!(dos.to_naive(), Some(dt));
    }

    #[test]
    fn dos_time_clamps_before_1980() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(DosDateTime::from_naive(dt), DosDateTime::EPOCH);
        assert_eq!(DosDateTime::from_unix_timestamp(0), DosDateTime::EPOCH);
    }

    #[test]
    fn odd_seconds_round_down() {
        let dt = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap().and_hms_opt(1, 2, 3).unwrap();
        let back = DosDateTime::from_naive(dt).to_naive().unwrap();
        assert_eq!(back.second(), 2);
    }

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader {
            version_needed:    VERSION_NEEDED_DEFLATE,
            flags:             0,
            method:            8,
            modified:          DosDateTime::EPOCH,
            crc32:             0xdead_beef,
            compressed_size:   7,
            uncompressed_size: 11,
            name:              b"pkg/a.py".to_vec(),
            extra:             Vec::new(),
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, header.size());
        assert_eq!(&buf[..4], &[0x50, 0x4b, 0x03, 0x04]);

        let parsed = LocalFileHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.name, b"pkg/a.py");
        assert_eq!(parsed.crc32, 0xdead_beef);
        assert_eq!(parsed.uncompressed_size, 11);
    }

    #[test]
    fn truncated_central_header_is_format_error() {
        let bytes = CENTRAL_HEADER_SIGNATURE.to_le_bytes();
        let err = CentralDirectoryHeader::read(Cursor::new(&bytes[..])).unwrap_err();
        assert!(err.is_format());
    }
}
