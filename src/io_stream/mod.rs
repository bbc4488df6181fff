//! Random-access ZIP engine shared by the read, write and append paths.
//!
//! # Writer
//! [`Container`] appends entries at an explicit cursor kept in
//! [`WriterState`], next to the in-memory [`CentralDirectory`]. Entry bytes
//! are compressed up front, so the local header carries final sizes and no
//! data descriptor is needed. The central directory and end record are only
//! written by [`Container::finish`], at the cursor, after which the store is
//! truncated to its new end.
//!
//! # Removing the last entry
//! Because the directory is not on disk until `finish`, undoing the most
//! recent write is: pop the directory record, move the cursor back to that
//! record's local header offset, truncate the store there. Only entries
//! written through this handle can be removed; `session_entries` counts them.
//!
//! # Reader
//! Opening locates the end record, reads the whole central directory and
//! checks that every local header starts before it. Entry payloads are never
//! loaded eagerly; [`Container::entry_reader`] hands out a streaming
//! [`EntryReader`] limited to the entry's compressed bytes.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

use crate::codec::{self, CompressionMethod, CompressionPolicy, DEFAULT_COMPRESSION_LEVEL};
use crate::error::ArchiveError;
use crate::header::{
    truncated, DosDateTime, LocalFileHeader, FLAG_ENCRYPTED, FLAG_UTF8, LOCAL_HEADER_SIZE,
    VERSION_MADE_BY, VERSION_NEEDED_DEFLATE, VERSION_NEEDED_STORE,
};
use crate::index::{fits_u32, CentralDirectory, EntryRecord};
use crate::trailer::{self, EndOfCentralDirectory};
use crate::verify::{Check, DigestAlgorithm, EntryReader};

/// Regular file, rw-r--r--.
pub const DEFAULT_UNIX_MODE: u32 = 0o100644;

// ── Truncate ─────────────────────────────────────────────────────────────────

/// Backing stores that can shrink.
pub trait Truncate {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.get_mut().truncate(len);
        Ok(())
    }
}

// ── Options and state ────────────────────────────────────────────────────────

/// Per-entry write settings.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub compression: CompressionPolicy,
    pub level:       u32,
    pub modified:    DosDateTime,
    /// Full `st_mode`, stored in the upper half of the external attributes.
    pub unix_mode:   u32,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression: CompressionPolicy::Auto,
            level:       DEFAULT_COMPRESSION_LEVEL,
            modified:    DosDateTime::EPOCH,
            unix_mode:   DEFAULT_UNIX_MODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterState {
    /// Where the next local header goes; also where the directory will go.
    pub cursor:          u64,
    /// Entries written through this handle that may still be removed.
    pub session_entries: usize,
}

// ── Container ────────────────────────────────────────────────────────────────

pub struct Container<F> {
    inner:   F,
    index:   CentralDirectory,
    writer:  Option<WriterState>,
    comment: Vec<u8>,
}

impl<F> Container<F> {
    pub fn index(&self) -> &CentralDirectory { &self.index }
    pub fn entries(&self) -> &[EntryRecord]  { self.index.records() }
    pub fn writer_state(&self) -> Option<WriterState> { self.writer }
    pub fn is_writable(&self) -> bool        { self.writer.is_some() }
    pub fn comment(&self) -> &[u8]           { &self.comment }
    pub fn into_inner(self) -> F             { self.inner }
    pub(crate) fn into_index(self) -> CentralDirectory { self.index }
}

impl<F: Read + Seek> Container<F> {
    /// Open an existing archive for reading only.
    pub fn open(mut inner: F) -> Result<Self, ArchiveError> {
        let (index, eocd) = read_directory(&mut inner)?;
        Ok(Self { inner, index, writer: None, comment: eocd.comment })
    }

    /// Stream the decompressed bytes of `name`, applying `check` once the
    /// stream is exhausted.
    pub fn entry_reader(
        &mut self,
        name:      &str,
        check:     Check,
        algorithm: &DigestAlgorithm,
    ) -> Result<EntryReader<'_>, ArchiveError> {
        let record = self.index
            .get(name)
            .ok_or_else(|| ArchiveError::EntryNotFound(name.to_owned()))?
            .clone();
        if record.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::unsupported(format!("encrypted entry {name}")));
        }

        self.inner.seek(SeekFrom::Start(record.header_offset))?;
        let local = LocalFileHeader::read(&mut self.inner)?;
        if String::from_utf8_lossy(&local.name) != record.name {
            return Err(ArchiveError::format(format!(
                "local header name for {name} does not match the central directory"
            )));
        }
        if local.flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::unsupported(format!("encrypted entry {name}")));
        }
        trace!(entry = name, offset = record.header_offset + local.size(), "opening entry");

        let payload: Box<dyn Read + '_> = Box::new((&mut self.inner).take(record.compressed_size));
        Ok(EntryReader::new(&record, payload, check, algorithm))
    }
}

impl<F: Read + Write + Seek + Truncate> Container<F> {
    /// Start a new, empty archive, discarding whatever `inner` held.
    pub fn create(mut inner: F) -> Result<Self, ArchiveError> {
        inner.truncate_to(0)?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            index:   CentralDirectory::default(),
            writer:  Some(WriterState { cursor: 0, session_entries: 0 }),
            comment: Vec::new(),
        })
    }

    /// Open an existing archive for adding entries. New entries overwrite
    /// the old central directory, which is rewritten on `finish`. An empty
    /// store starts a fresh archive.
    pub fn append(mut inner: F) -> Result<Self, ArchiveError> {
        if inner.seek(SeekFrom::End(0))? == 0 {
            return Self::create(inner);
        }
        let (index, eocd) = read_directory(&mut inner)?;
        let cursor = u64::from(eocd.cd_offset);
        debug!(entries = index.len(), cursor, "opened archive for append");
        Ok(Self {
            inner,
            index,
            writer:  Some(WriterState { cursor, session_entries: 0 }),
            comment: eocd.comment,
        })
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<(), ArchiveError> {
        if self.writer.is_none() {
            return Err(ArchiveError::ReadOnly);
        }
        if comment.len() > usize::from(u16::MAX) {
            return Err(ArchiveError::unsupported("archive comment longer than 65535 bytes"));
        }
        self.comment = comment;
        Ok(())
    }

    pub fn write_entry(
        &mut self,
        name: &str,
        data: &[u8],
        opts: &EntryOptions,
    ) -> Result<EntryRecord, ArchiveError> {
        let state = self.writer.ok_or(ArchiveError::ReadOnly)?;
        validate_name(name)?;
        if self.index.contains(name) {
            return Err(ArchiveError::DuplicateEntry(name.to_owned()));
        }
        if self.index.len() >= usize::from(u16::MAX) {
            return Err(ArchiveError::unsupported("more than 65535 entries requires zip64"));
        }

        let (method, payload) = codec::compress(data, opts.compression, opts.level)?;
        let header_offset = state.cursor;
        fits_u32(header_offset, "local header offset")?;

        let local = LocalFileHeader {
            version_needed:    version_needed(method),
            flags:             if name.is_ascii() { 0 } else { FLAG_UTF8 },
            method:            method.code(),
            modified:          opts.modified,
            crc32:             crc32fast::hash(data),
            compressed_size:   fits_u32(payload.len() as u64, "compressed size")?,
            uncompressed_size: fits_u32(data.len() as u64, "uncompressed size")?,
            name:              name.as_bytes().to_vec(),
            extra:             Vec::new(),
        };

        self.inner.seek(SeekFrom::Start(header_offset))?;
        local.write(&mut self.inner)?;
        self.inner.write_all(&payload)?;
        let cursor = header_offset + local.size() + payload.len() as u64;

        let record = EntryRecord {
            name:              name.to_owned(),
            header_offset,
            method,
            compressed_size:   payload.len() as u64,
            uncompressed_size: data.len() as u64,
            crc32:             local.crc32,
            modified:          local.modified,
            flags:             local.flags,
            external_attr:     opts.unix_mode << 16,
            version_made_by:   VERSION_MADE_BY,
            version_needed:    local.version_needed,
            internal_attr:     0,
            extra:             Vec::new(),
            comment:           Vec::new(),
        };
        self.index.push(record.clone())?;
        self.writer = Some(WriterState { cursor, session_entries: state.session_entries + 1 });

        debug!(
            entry = name,
            method = method.name(),
            size = data.len(),
            compressed = payload.len(),
            offset = header_offset,
            "wrote entry"
        );
        Ok(record)
    }

    /// Undo the most recent `write_entry` of this session.
    pub fn remove_last_entry(&mut self) -> Result<EntryRecord, ArchiveError> {
        let state = self.writer.ok_or(ArchiveError::ReadOnly)?;
        if state.session_entries == 0 {
            return Err(ArchiveError::NothingToRemove);
        }
        let record = self.index.pop().ok_or(ArchiveError::NothingToRemove)?;
        self.inner.truncate_to(record.header_offset)?;
        self.writer = Some(WriterState {
            cursor:          record.header_offset,
            session_entries: state.session_entries - 1,
        });
        debug!(entry = %record.name, offset = record.header_offset, "removed last entry");
        Ok(record)
    }

    /// Write the central directory and end record at the cursor, then cut
    /// the store off behind them. The container is read-only afterwards.
    pub fn finish(&mut self) -> Result<(), ArchiveError> {
        let Some(state) = self.writer else {
            return Ok(());
        };

        let mut directory = Vec::new();
        let cd_size = self.index.write_to(&mut directory)?;
        let eocd = EndOfCentralDirectory::new(
            self.index.len() as u16,
            fits_u32(cd_size, "central directory size")?,
            fits_u32(state.cursor, "central directory offset")?,
            self.comment.clone(),
        );

        self.inner.seek(SeekFrom::Start(state.cursor))?;
        self.inner.write_all(&directory)?;
        eocd.write(&mut self.inner)?;
        let end = self.inner.stream_position()?;
        self.inner.flush()?;
        self.inner.truncate_to(end)?;

        self.writer = None;
        debug!(entries = self.index.len(), size = end, "finished archive");
        Ok(())
    }
}

fn version_needed(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Stored   => VERSION_NEEDED_STORE,
        CompressionMethod::Deflated => VERSION_NEEDED_DEFLATE,
    }
}

fn read_directory<F: Read + Seek>(
    inner: &mut F,
) -> Result<(CentralDirectory, EndOfCentralDirectory), ArchiveError> {
    let (_, eocd) = trailer::locate(inner)?;
    let cd_offset = u64::from(eocd.cd_offset);

    inner.seek(SeekFrom::Start(cd_offset))?;
    let mut raw = vec![0u8; eocd.cd_size as usize];
    inner.read_exact(&mut raw).map_err(truncated("central directory"))?;
    let index = CentralDirectory::read_from(&raw[..], usize::from(eocd.total_entries))?;

    if let Some(bad) = index.records().iter().find(|r| r.header_offset + LOCAL_HEADER_SIZE > cd_offset) {
        return Err(ArchiveError::format(format!(
            "local header of {} lies inside the central directory", bad.name
        )));
    }
    Ok((index, eocd))
}

/// Entry names are relative POSIX paths. A trailing `/` marks a directory.
pub fn validate_name(name: &str) -> Result<(), ArchiveError> {
    let invalid = || ArchiveError::InvalidEntryName(name.to_owned());
    if name.is_empty() || name.len() > usize::from(u16::MAX) {
        return Err(invalid());
    }
    if name.starts_with('/') || name.contains('\\') || name.contains('\0') {
        return Err(invalid());
    }
    let body = name.strip_suffix('/').unwrap_or(name);
    if body.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(invalid());
    }
    Ok(())
}
