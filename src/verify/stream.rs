//! Lazy, verifying entry stream.
//!
//! Bytes are decompressed on demand. Each chunk handed to the caller also
//! feeds the CRC-32 and, when a digest comparison applies, the running
//! digest. Nothing can be decided before the last byte, so every verdict is
//! delivered by the `read` call that hands out the final bytes (or, for an
//! empty entry, the first `read`), or by [`EntryReader::finish`], which
//! drains the rest first.
//!
//! Failures travel through [`Read`] as `io::Error`s wrapping an
//! [`ArchiveError`]; `ArchiveError::from` recovers the original variant.

use crc32fast::Hasher as Crc32;
use digest::DynDigest;
use std::io::{self, Read};
use tracing::{debug, trace};

use crate::codec::get_codec;
use crate::error::ArchiveError;
use crate::index::EntryRecord;
use crate::verify::{Check, DigestAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Verified,
    Failed,
}

pub struct EntryReader<'a> {
    name:          String,
    inner:         Box<dyn Read + 'a>,
    check:         Check,
    hasher:        Option<Box<dyn DynDigest>>,
    crc:           Crc32,
    expected_crc:  u32,
    expected_size: u64,
    produced:      u64,
    state:         StreamState,
}

impl<'a> EntryReader<'a> {
    /// `payload` must yield exactly the entry's compressed bytes.
    pub(crate) fn new(
        record:    &EntryRecord,
        payload:   Box<dyn Read + 'a>,
        check:     Check,
        algorithm: &DigestAlgorithm,
    ) -> Self {
        let hasher = check.needs_digest().then(|| algorithm.hasher());
        Self {
            name:          record.name.clone(),
            inner:         get_codec(record.method).decoder(payload),
            check,
            hasher,
            crc:           Crc32::new(),
            expected_crc:  record.crc32,
            expected_size: record.uncompressed_size,
            produced:      0,
            state:         StreamState::Streaming,
        }
    }

    pub fn name(&self) -> &str { &self.name }

    /// Decompressed size recorded in the central directory.
    pub fn size(&self) -> u64 { self.expected_size }

    /// True once the stream is exhausted and every check passed.
    pub fn is_verified(&self) -> bool { self.state == StreamState::Verified }

    /// Read whatever is left and report the verification verdict.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        let mut buf = [0u8; 8192];
        loop {
            match self.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ArchiveError::from(e)),
            }
        }
    }

    fn complete(&mut self) -> Result<(), ArchiveError> {
        if self.produced != self.expected_size {
            return Err(ArchiveError::SizeMismatch {
                name:     self.name.clone(),
                expected: self.expected_size,
                actual:   self.produced,
            });
        }
        let crc = std::mem::take(&mut self.crc).finalize();
        if crc != self.expected_crc {
            return Err(ArchiveError::ChecksumMismatch {
                name:     self.name.clone(),
                expected: self.expected_crc,
                actual:   crc,
            });
        }
        match &self.check {
            Check::Pass => Ok(()),
            Check::RejectUnregistered => Err(ArchiveError::Unverified { name: self.name.clone() }),
            Check::Compare(expected) => {
                let actual = match self.hasher.take() {
                    Some(h) => h.finalize().into_vec(),
                    None    => Vec::new(),
                };
                if &actual == expected {
                    Ok(())
                } else {
                    Err(ArchiveError::DigestMismatch {
                        name:     self.name.clone(),
                        expected: hex::encode(expected),
                        actual:   hex::encode(&actual),
                    })
                }
            }
        }
    }

    fn fail(&mut self, err: ArchiveError) -> io::Error {
        debug!(entry = %self.name, error = %err, "entry verification failed");
        self.state = StreamState::Failed;
        err.into()
    }

    /// The decoder must be exhausted once the recorded size is reached.
    fn expect_end(&mut self) -> Result<(), ArchiveError> {
        let mut extra = [0u8; 1];
        loop {
            match self.inner.read(&mut extra) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    return Err(ArchiveError::SizeMismatch {
                        name:     self.name.clone(),
                        expected: self.expected_size,
                        actual:   self.produced + n as u64,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.decode_error(e)),
            }
        }
    }

    fn decode_error(&self, e: io::Error) -> ArchiveError {
        match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                ArchiveError::format(format!("corrupt compressed data in {}: {e}", self.name))
            }
            io::ErrorKind::UnexpectedEof => {
                ArchiveError::format(format!("truncated compressed data in {}", self.name))
            }
            _ => ArchiveError::from(e),
        }
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state {
            StreamState::Verified => return Ok(0),
            StreamState::Failed => {
                return Err(io::Error::other(format!(
                    "entry stream for {} already failed", self.name
                )))
            }
            StreamState::Streaming => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => {
                let err = self.decode_error(e);
                return Err(self.fail(err));
            }
        };

        if n == 0 {
            return match self.complete() {
                Ok(()) => {
                    trace!(entry = %self.name, bytes = self.produced, "entry verified");
                    self.state = StreamState::Verified;
                    Ok(0)
                }
                Err(err) => Err(self.fail(err)),
            };
        }

        self.produced += n as u64;
        if self.produced > self.expected_size {
            let err = ArchiveError::SizeMismatch {
                name:     self.name.clone(),
                expected: self.expected_size,
                actual:   self.produced,
            };
            return Err(self.fail(err));
        }
        self.crc.update(&buf[..n]);
        if let Some(h) = self.hasher.as_mut() {
            h.update(&buf[..n]);
        }

        // Callers that stop at `size()` bytes never issue the terminal read,
        // so the last chunk carries the verdict.
        if self.produced == self.expected_size {
            if let Err(err) = self.expect_end() {
                return Err(self.fail(err));
            }
            if let Err(err) = self.complete() {
                return Err(self.fail(err));
            }
            trace!(entry = %self.name, bytes = self.produced, "entry verified");
            self.state = StreamState::Verified;
        }
        Ok(n)
    }
}

impl Drop for EntryReader<'_> {
    fn drop(&mut self) {
        if self.state == StreamState::Streaming {
            debug!(entry = %self.name, read = self.produced, "entry stream dropped before verification");
        }
    }
}
