//! Content record: the CSV manifest (`RECORD`) listing every entry's digest
//! and size, written as the archive's final entry.
//!
//! Row format: `path,algorithm=urlsafe-base64-nopad,size`. The record's own
//! row carries an empty hash and size, since it cannot contain itself.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use tracing::{debug, info};

use crate::archive::Archive;
use crate::error::ArchiveError;
use crate::index::EntryRecord;
use crate::verify::{DigestAlgorithm, Expectation};

const RECORD_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordHash {
    pub algorithm: String,
    pub digest:    Vec<u8>,
}

impl RecordHash {
    pub fn parse(field: &str) -> Result<Self, ArchiveError> {
        let (algorithm, encoded) = field
            .split_once('=')
            .ok_or_else(|| ArchiveError::format(format!("record hash {field:?} lacks '='")))?;
        let digest = RECORD_B64
            .decode(encoded)
            .map_err(|e| ArchiveError::format(format!("record hash {field:?}: {e}")))?;
        Ok(Self { algorithm: algorithm.to_owned(), digest })
    }
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.algorithm, RECORD_B64.encode(&self.digest))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRow {
    pub path: String,
    pub hash: Option<RecordHash>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentRecord {
    rows: Vec<RecordRow>,
}

impl ContentRecord {
    pub fn rows(&self) -> &[RecordRow] { &self.rows }

    pub fn get(&self, path: &str) -> Option<&RecordRow> {
        self.rows.iter().find(|r| r.path == path)
    }

    pub fn push_entry(&mut self, path: &str, data: &[u8], algorithm: &DigestAlgorithm) {
        self.push_hashed(path, algorithm.name(), algorithm.digest(data), data.len() as u64);
    }

    pub fn push_hashed(&mut self, path: &str, algorithm: &str, digest: Vec<u8>, size: u64) {
        self.rows.push(RecordRow {
            path: path.to_owned(),
            hash: Some(RecordHash { algorithm: algorithm.to_owned(), digest }),
            size: Some(size),
        });
    }

    pub fn push_unhashed(&mut self, path: &str) {
        self.rows.push(RecordRow { path: path.to_owned(), hash: None, size: None });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for row in &self.rows {
            let hash = row.hash.as_ref().map(ToString::to_string).unwrap_or_default();
            let size = row.size.map(|s| s.to_string()).unwrap_or_default();
            out.push_str(&csv_field(&row.path));
            out.push(',');
            out.push_str(&csv_field(&hash));
            out.push(',');
            out.push_str(&size);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ArchiveError::format("content record is not UTF-8"))?;
        let mut rows = Vec::new();
        for (line_no, fields) in split_csv(text)?.into_iter().enumerate() {
            if fields.iter().all(String::is_empty) {
                continue;
            }
            let [path, hash, size]: [String; 3] = fields.try_into().map_err(|f: Vec<String>| {
                ArchiveError::format(format!(
                    "content record row {} has {} fields, expected 3", line_no + 1, f.len()
                ))
            })?;
            let hash = if hash.is_empty() { None } else { Some(RecordHash::parse(&hash)?) };
            let size = if size.is_empty() {
                None
            } else {
                Some(size.parse::<u64>().map_err(|_| {
                    ArchiveError::format(format!("content record size {size:?} for {path}"))
                })?)
            };
            rows.push(RecordRow { path, hash, size });
        }
        Ok(Self { rows })
    }

    /// Register one expectation per row on `archive`: the row's digest, or
    /// `Skip` for rows without one. Returns the number of digests registered.
    pub fn register_expectations(&self, archive: &mut Archive) -> Result<usize, ArchiveError> {
        let algorithm = *archive.algorithm();
        let mut digests = 0;
        for row in &self.rows {
            let expectation = match &row.hash {
                None => Expectation::Skip,
                Some(hash) => {
                    if hash.algorithm != algorithm.name() {
                        return Err(ArchiveError::unsupported(format!(
                            "{} is hashed with {}, archive verifies with {}",
                            row.path, hash.algorithm, algorithm.name()
                        )));
                    }
                    if hash.digest.len() != algorithm.output_size() {
                        return Err(ArchiveError::format(format!(
                            "{} digest for {} has {} bytes", hash.algorithm, row.path, hash.digest.len()
                        )));
                    }
                    digests += 1;
                    Expectation::Digest(hash.digest.clone())
                }
            };
            archive.register_expected_digest(row.path.clone(), expectation);
        }
        Ok(digests)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

fn split_csv(text: &str) -> Result<Vec<Vec<String>>, ArchiveError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if quoted {
        return Err(ArchiveError::format("unterminated quote in content record"));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

// ── Archive-level operations ─────────────────────────────────────────────────

/// Hash every entry of `archive` (except `record_name` and directories) and
/// write the content record as the last entry.
///
/// If the record is the last entry written in this session it is removed and
/// recomputed. A record from an earlier session cannot be replaced.
pub fn seal_content_record(archive: &mut Archive, record_name: &str) -> Result<EntryRecord, ArchiveError> {
    if archive.entry(record_name).is_some() {
        let is_last = archive.list_entries().last().is_some_and(|e| e.name == record_name);
        if is_last && archive.session_entries() > 0 {
            archive.remove_last_entry()?;
            debug!(entry = record_name, "recomputing content record");
        } else {
            return Err(ArchiveError::DuplicateEntry(record_name.to_owned()));
        }
    }

    let algorithm = *archive.algorithm();
    let names: Vec<String> = archive
        .list_entries()
        .iter()
        .filter(|e| !e.is_dir())
        .map(|e| e.name.clone())
        .collect();

    let mut record = ContentRecord::default();
    let mut buf = [0u8; 8192];
    for name in names {
        let mut hasher = algorithm.hasher();
        let mut size = 0u64;
        let mut reader = archive.open_entry(&name)?;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        record.push_hashed(&name, algorithm.name(), hasher.finalize().into_vec(), size);
    }
    record.push_unhashed(record_name);

    let written = archive.write_entry(record_name, &record.to_bytes())?;
    info!(entry = record_name, rows = record.rows().len(), "sealed content record");
    Ok(written)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    /// Entries whose digest was checked.
    pub verified:  usize,
    /// Entries read without a digest check (skip rows, lenient mode).
    pub unchecked: usize,
}

/// Check every entry of `archive` against its content record.
///
/// In strict mode an entry missing from the record is an integrity error;
/// in lenient mode it is read unchecked. A record row naming a missing entry
/// is always an error.
pub fn verify_archive(archive: &mut Archive, record_name: &str) -> Result<VerifySummary, ArchiveError> {
    archive.register_expected_digest(record_name, Expectation::Skip);
    let record = ContentRecord::parse(&archive.read_entry(record_name)?)?;
    record.register_expectations(archive)?;

    for row in record.rows() {
        let entry = archive
            .entry(&row.path)
            .ok_or_else(|| ArchiveError::EntryNotFound(row.path.clone()))?;
        if let Some(size) = row.size {
            if size != entry.uncompressed_size {
                return Err(ArchiveError::SizeMismatch {
                    name:     row.path.clone(),
                    expected: size,
                    actual:   entry.uncompressed_size,
                });
            }
        }
    }

    let names: Vec<String> = archive
        .list_entries()
        .iter()
        .filter(|e| !e.is_dir())
        .map(|e| e.name.clone())
        .collect();
    let mut summary = VerifySummary::default();
    for name in names {
        let checked = matches!(archive.expected_digests().get(&name), Some(Expectation::Digest(_)));
        archive.open_entry(&name)?.finish()?;
        if checked {
            summary.verified += 1;
        } else {
            summary.unchecked += 1;
        }
    }
    info!(verified = summary.verified, unchecked = summary.unchecked, "verified archive");
    Ok(summary)
}
