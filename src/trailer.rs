use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::ArchiveError;
use crate::header::truncated;

pub const EOCD_SIGNATURE:         u32 = 0x0605_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const EOCD_SIZE:              u64 = 22;
const ZIP64_LOCATOR_SIZE:         u64 = 20;
const MAX_COMMENT_LEN:            u64 = u16::MAX as u64;

/// End-of-central-directory record, the fixed anchor every reader starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number:       u16,
    pub cd_disk:           u16,
    pub entries_this_disk: u16,
    pub total_entries:     u16,
    pub cd_size:           u32,
    pub cd_offset:         u32,
    pub comment:           Vec<u8>,
}

impl EndOfCentralDirectory {
    pub fn new(entries: u16, cd_size: u32, cd_offset: u32, comment: Vec<u8>) -> Self {
        Self {
            disk_number:       0,
            cd_disk:           0,
            entries_this_disk: entries,
            total_entries:     entries,
            cd_size,
            cd_offset,
            comment,
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(EOCD_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.cd_disk)?;
        writer.write_u16::<LittleEndian>(self.entries_this_disk)?;
        writer.write_u16::<LittleEndian>(self.total_entries)?;
        writer.write_u32::<LittleEndian>(self.cd_size)?;
        writer.write_u32::<LittleEndian>(self.cd_offset)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, ArchiveError> {
        let signature = reader.read_u32::<LittleEndian>().map_err(truncated("end of central directory"))?;
        if signature != EOCD_SIGNATURE {
            return Err(ArchiveError::format("bad end of central directory signature"));
        }
        let mut fixed = [0u8; EOCD_SIZE as usize - 4];
        reader.read_exact(&mut fixed).map_err(truncated("end of central directory"))?;
        let mut f = &fixed[..];
        let disk_number       = f.read_u16::<LittleEndian>()?;
        let cd_disk           = f.read_u16::<LittleEndian>()?;
        let entries_this_disk = f.read_u16::<LittleEndian>()?;
        let total_entries     = f.read_u16::<LittleEndian>()?;
        let cd_size           = f.read_u32::<LittleEndian>()?;
        let cd_offset         = f.read_u32::<LittleEndian>()?;
        let comment_len       = f.read_u16::<LittleEndian>()?;
        let mut comment = vec![0u8; comment_len as usize];
        reader.read_exact(&mut comment).map_err(truncated("archive comment"))?;
        Ok(Self {
            disk_number,
            cd_disk,
            entries_this_disk,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    /// Rejects layouts this crate does not handle: split archives and ZIP64.
    pub fn check_supported(&self) -> Result<(), ArchiveError> {
        if self.disk_number != 0 || self.cd_disk != 0 || self.entries_this_disk != self.total_entries {
            return Err(ArchiveError::unsupported("multi-volume archive"));
        }
        if self.cd_offset == u32::MAX || self.cd_size == u32::MAX {
            return Err(ArchiveError::unsupported("zip64 central directory"));
        }
        Ok(())
    }
}

/// Finds the end-of-central-directory record by scanning backwards from the
/// end of the file. Returns its absolute offset and the parsed record.
pub fn locate<R: Read + Seek>(reader: &mut R) -> Result<(u64, EndOfCentralDirectory), ArchiveError> {
    let len = reader.seek(SeekFrom::End(0))?;
    if len < EOCD_SIZE {
        return Err(ArchiveError::format("file too small to be a zip archive"));
    }

    let window = len.min(EOCD_SIZE + MAX_COMMENT_LEN);
    let start = len - window;
    reader.seek(SeekFrom::Start(start))?;
    let mut tail = vec![0u8; window as usize];
    reader.read_exact(&mut tail)?;

    let sig = EOCD_SIGNATURE.to_le_bytes();
    for pos in (0..=tail.len() - EOCD_SIZE as usize).rev() {
        if tail[pos..pos + 4] != sig {
            continue;
        }
        let comment_len = u16::from_le_bytes([tail[pos + 20], tail[pos + 21]]) as usize;
        if pos + EOCD_SIZE as usize + comment_len != tail.len() {
            continue;
        }
        let eocd = EndOfCentralDirectory::read(&tail[pos..])?;
        let eocd_offset = start + pos as u64;

        if eocd_offset >= ZIP64_LOCATOR_SIZE {
            reader.seek(SeekFrom::Start(eocd_offset - ZIP64_LOCATOR_SIZE))?;
            if reader.read_u32::<LittleEndian>()? == ZIP64_LOCATOR_SIGNATURE {
                return Err(ArchiveError::unsupported("zip64 end of central directory"));
            }
        }
        eocd.check_supported()?;
        if u64::from(eocd.cd_offset) + u64::from(eocd.cd_size) > eocd_offset {
            return Err(ArchiveError::format(
                "central directory overlaps end of central directory record",
            ));
        }
        return Ok((eocd_offset, eocd));
    }

    Err(ArchiveError::format("end of central directory record not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn locates_record_behind_comment() {
        let mut buf = vec![0xaa; 10];
        EndOfCentralDirectory::new(0, 0, 10, b"built by hand".to_vec())
            .write(&mut buf)
            .unwrap();
        let (offset, eocd) = locate(&mut Cursor::new(buf)).unwrap();
        assert_eq!(offset, 10);
        assert_eq!(eocd.comment, b"built by hand");
    }

    #[test]
    fn rejects_garbage() {
        let err = locate(&mut Cursor::new(vec![0u8; 64])).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn rejects_split_archives() {
        let mut eocd = EndOfCentralDirectory::new(1, 46, 0, Vec::new());
        eocd.disk_number = 2;
        let mut buf = vec![0u8; 46];
        eocd.write(&mut buf).unwrap();
        let err = locate(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(_)));
    }
}
