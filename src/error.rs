//! Error type shared by every archive operation.
//!
//! Callers usually only need [`ArchiveError::kind`]: integrity failures
//! (content did not match its registered digest) and state failures (the
//! handle was misused) are the two kinds worth telling apart, since the first
//! means "abort, the archive is bad" and the second means "fix the caller".

use std::io;
use thiserror::Error;

/// Coarse classification of an [`ArchiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying storage failed.
    Io,
    /// Entry content did not match its expectation.
    Integrity,
    /// Operation not valid for the handle's current state.
    State,
    /// Malformed or unsupported container structure.
    Format,
    /// No entry with the requested name.
    NotFound,
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("digest mismatch for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name:     String,
        expected: String,
        actual:   String,
    },
    #[error("no expected digest registered for {name} (strict verification)")]
    Unverified { name: String },

    #[error("archive is closed")]
    Closed,
    #[error("archive is read-only")]
    ReadOnly,
    #[error("no entry has been written in this session")]
    NothingToRemove,
    #[error("duplicate entry name: {0}")]
    DuplicateEntry(String),
    #[error("invalid entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("malformed archive: {0}")]
    Format(String),
    #[error("unsupported archive feature: {0}")]
    Unsupported(String),
    #[error("CRC-32 mismatch for {name}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        name:     String,
        expected: u32,
        actual:   u32,
    },
    #[error("size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name:     String,
        expected: u64,
        actual:   u64,
    },

    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Io(_) => ErrorKind::Io,
            ArchiveError::DigestMismatch { .. }
            | ArchiveError::Unverified { .. } => ErrorKind::Integrity,
            ArchiveError::Closed
            | ArchiveError::ReadOnly
            | ArchiveError::NothingToRemove
            | ArchiveError::DuplicateEntry(_)
            | ArchiveError::InvalidEntryName(_) => ErrorKind::State,
            ArchiveError::Format(_)
            | ArchiveError::Unsupported(_)
            | ArchiveError::ChecksumMismatch { .. }
            | ArchiveError::SizeMismatch { .. } => ErrorKind::Format,
            ArchiveError::EntryNotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_integrity(&self) -> bool { self.kind() == ErrorKind::Integrity }
    pub fn is_state(&self)     -> bool { self.kind() == ErrorKind::State }
    pub fn is_format(&self)    -> bool { self.kind() == ErrorKind::Format }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ArchiveError::Format(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        ArchiveError::Unsupported(msg.into())
    }
}

/// Unwraps an `ArchiveError` that travelled through a `Read` impl as an
/// `io::Error`; anything else stays an I/O failure.
impl From<io::Error> for ArchiveError {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<ArchiveError>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(archive_err) = inner.downcast::<ArchiveError>() {
                    return *archive_err;
                }
            }
            return ArchiveError::format("lost wrapped archive error");
        }
        ArchiveError::Io(e)
    }
}

impl From<ArchiveError> for io::Error {
    fn from(e: ArchiveError) -> Self {
        if let ArchiveError::Io(inner) = e {
            return inner;
        }
        let kind = match e.kind() {
            ErrorKind::Integrity | ErrorKind::Format => io::ErrorKind::InvalidData,
            ErrorKind::NotFound                      => io::ErrorKind::NotFound,
            ErrorKind::Io | ErrorKind::State         => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
