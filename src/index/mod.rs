use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

use crate::codec::CompressionMethod;
use crate::error::ArchiveError;
use crate::header::{CentralDirectoryHeader, DosDateTime, FLAG_UTF8, VERSION_MADE_BY};

/// One entry as described by the central directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub name:              String,
    pub header_offset:     u64,
    pub method:            CompressionMethod,
    pub compressed_size:   u64,
    pub uncompressed_size: u64,
    pub crc32:             u32,
    pub modified:          DosDateTime,
    pub flags:             u16,
    pub external_attr:     u32,

    // Carried through untouched so an append session rewrites older
    // central directory records byte for byte.
    #[serde(skip)]
    pub version_made_by: u16,
    #[serde(skip)]
    pub version_needed:  u16,
    #[serde(skip)]
    pub internal_attr:   u16,
    #[serde(skip)]
    pub extra:           Vec<u8>,
    #[serde(skip)]
    pub comment:         Vec<u8>,
}

impl EntryRecord {
    /// Unix permission bits recorded in the external attributes, if any.
    pub fn unix_mode(&self) -> Option<u32> {
        if self.version_made_by >> 8 == VERSION_MADE_BY >> 8 && self.external_attr >> 16 != 0 {
            Some(self.external_attr >> 16)
        } else {
            None
        }
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn from_central_header(h: CentralDirectoryHeader) -> Result<Self, ArchiveError> {
        if h.disk_start != 0 {
            return Err(ArchiveError::unsupported("entry stored on another volume"));
        }
        if h.compressed_size == u32::MAX
            || h.uncompressed_size == u32::MAX
            || h.header_offset == u32::MAX
        {
            return Err(ArchiveError::unsupported("zip64 entry"));
        }
        let name = if h.flags & FLAG_UTF8 != 0 {
            String::from_utf8(h.name)
                .map_err(|_| ArchiveError::format("entry name flagged UTF-8 is not valid UTF-8"))?
        } else {
            String::from_utf8_lossy(&h.name).into_owned()
        };
        Ok(Self {
            name,
            header_offset:     u64::from(h.header_offset),
            method:            CompressionMethod::from_code(h.method)?,
            compressed_size:   u64::from(h.compressed_size),
            uncompressed_size: u64::from(h.uncompressed_size),
            crc32:             h.crc32,
            modified:          h.modified,
            flags:             h.flags,
            external_attr:     h.external_attr,
            version_made_by:   h.version_made_by,
            version_needed:    h.version_needed,
            internal_attr:     h.internal_attr,
            extra:             h.extra,
            comment:           h.comment,
        })
    }

    pub fn to_central_header(&self) -> Result<CentralDirectoryHeader, ArchiveError> {
        Ok(CentralDirectoryHeader {
            version_made_by:   self.version_made_by,
            version_needed:    self.version_needed,
            flags:             self.flags,
            method:            self.method.code(),
            modified:          self.modified,
            crc32:             self.crc32,
            compressed_size:   fits_u32(self.compressed_size, "compressed size")?,
            uncompressed_size: fits_u32(self.uncompressed_size, "uncompressed size")?,
            disk_start:        0,
            internal_attr:     self.internal_attr,
            external_attr:     self.external_attr,
            header_offset:     fits_u32(self.header_offset, "local header offset")?,
            name:              self.name.as_bytes().to_vec(),
            extra:             self.extra.clone(),
            comment:           self.comment.clone(),
        })
    }
}

/// Values at or above `u32::MAX` need ZIP64, which is not produced.
pub(crate) fn fits_u32(value: u64, what: &str) -> Result<u32, ArchiveError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v != u32::MAX)
        .ok_or_else(|| ArchiveError::unsupported(format!("{what} {value} requires zip64")))
}

// ── CentralDirectory ─────────────────────────────────────────────────────────

/// Ordered entry list plus a name lookup. Physical order and index order
/// coincide: records are pushed as entries are written.
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    records:   Vec<EntryRecord>,
    positions: HashMap<String, usize>,
}

impl CentralDirectory {
    pub fn push(&mut self, record: EntryRecord) -> Result<(), ArchiveError> {
        if self.positions.contains_key(&record.name) {
            return Err(ArchiveError::DuplicateEntry(record.name));
        }
        self.positions.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<EntryRecord> {
        let record = self.records.pop()?;
        self.positions.remove(&record.name);
        Some(record)
    }

    pub fn get(&self, name: &str) -> Option<&EntryRecord> {
        self.positions.get(name).map(|&i| &self.records[i])
    }

    pub fn contains(&self, name: &str) -> bool { self.positions.contains_key(name) }
    pub fn records(&self) -> &[EntryRecord]     { &self.records }
    pub fn last(&self) -> Option<&EntryRecord>  { self.records.last() }
    pub fn len(&self) -> usize                  { self.records.len() }
    pub fn is_empty(&self) -> bool              { self.records.is_empty() }

    /// Serialise every record as a central directory header. Returns the
    /// number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<u64, ArchiveError> {
        let mut written = 0u64;
        for record in &self.records {
            let header = record.to_central_header()?;
            header.write(&mut writer)?;
            written += header.size();
        }
        Ok(written)
    }

    pub fn read_from<R: Read>(mut reader: R, count: usize) -> Result<Self, ArchiveError> {
        let mut dir = CentralDirectory::default();
        for _ in 0..count {
            let header = CentralDirectoryHeader::read(&mut reader)?;
            let record = EntryRecord::from_central_header(header)?;
            if dir.contains(&record.name) {
                return Err(ArchiveError::format(format!(
                    "central directory lists {} twice", record.name
                )));
            }
            dir.push(record)?;
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::VERSION_NEEDED_STORE;

    fn record(name: &str, offset: u64) -> EntryRecord {
        EntryRecord {
            name:              name.to_owned(),
            header_offset:     offset,
            method:            CompressionMethod::Stored,
            compressed_size:   4,
            uncompressed_size: 4,
            crc32:             0,
            modified:          DosDateTime::EPOCH,
            flags:             0,
            external_attr:     0o100644 << 16,
            version_made_by:   VERSION_MADE_BY,
            version_needed:    VERSION_NEEDED_STORE,
            internal_attr:     0,
            extra:             Vec::new(),
            comment:           Vec::new(),
        }
    }

    #[test]
    fn push_rejects_duplicates() {
        let mut dir = CentralDirectory::default();
        dir.push(record("a", 0)).unwrap();
        let err = dir.push(record("a", 40)).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateEntry(ref n) if n == "a"));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn pop_forgets_name() {
        let mut dir = CentralDirectory::default();
        dir.push(record("a", 0)).unwrap();
        dir.push(record("b", 40)).unwrap();
        assert_eq!(dir.pop().unwrap().name, "b");
        assert!(!dir.contains("b"));
        dir.push(record("b", 40)).unwrap();
        assert_eq!(dir.get("b").unwrap().header_offset, 40);
    }

    #[test]
    fn central_directory_round_trip() {
        let mut dir = CentralDirectory::default();
        dir.push(record("pkg/__init__.py", 0)).unwrap();
        dir.push(record("pkg-1.0.dist-info/RECORD", 64)).unwrap();
        let mut buf = Vec::new();
        let size = dir.write_to(&mut buf).unwrap();
        assert_eq!(size, buf.len() as u64);

        let back = CentralDirectory::read_from(&buf[..], 2).unwrap();
        assert_eq!(back.records(), dir.records());
        assert_eq!(back.get("pkg/__init__.py").unwrap().unix_mode(), Some(0o100644));
    }

    #[test]
    fn oversized_values_need_zip64() {
        let mut big = record("huge.bin", 0);
        big.uncompressed_size = u64::from(u32::MAX);
        assert!(matches!(big.to_central_header(), Err(ArchiveError::Unsupported(_))));
    }
}
