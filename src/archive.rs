//! High-level [`Archive`] API, the primary embedding surface.
//!
//! ```no_run
//! use wheelzip::archive::{Archive, OpenMode};
//! use wheelzip::verify::{DigestAlgorithm, Expectation, VerificationMode};
//!
//! // Write
//! let mut ar = Archive::open("demo-1.0-py3-none-any.whl", OpenMode::Write)?;
//! ar.write_entry("demo/__init__.py", b"print('hi')\n")?;
//! ar.close()?;
//!
//! // Verified read
//! let mut ar = Archive::open("demo-1.0-py3-none-any.whl", OpenMode::Read)?;
//! let digest = DigestAlgorithm::sha256().digest(b"print('hi')\n");
//! ar.register_expected_digest("demo/__init__.py", Expectation::Digest(digest));
//! ar.set_verification_mode(VerificationMode::Strict);
//! let data = ar.read_entry("demo/__init__.py")?;
//! assert_eq!(data, b"print('hi')\n");
//! # Ok::<(), wheelzip::ArchiveError>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ArchiveError;
use crate::index::{CentralDirectory, EntryRecord};
use crate::io_stream::{validate_name, Container, EntryOptions};
use crate::verify::{
    DigestAlgorithm, EntryReader, ExpectedDigests, Expectation, VerificationMode,
};

/// Upper bound on the buffer reserved from an entry's recorded size.
const MAX_PREALLOCATION: u64 = 1 << 20;

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create a new archive, truncating any existing file.
    Write,
    /// Add entries to an existing archive (a missing file starts a new one).
    Append,
}

/// Configuration for [`Archive::open_with`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub verification: VerificationMode,
    /// Fixed for the lifetime of the handle.
    pub algorithm:    DigestAlgorithm,
    /// Defaults for [`Archive::write_entry`].
    pub entry:        EntryOptions,
}

// ── Archive ──────────────────────────────────────────────────────────────────

enum ArchiveState {
    Open(Container<File>),
    /// The file is released; only the final index is kept for listing.
    Closed(CentralDirectory),
}

pub struct Archive {
    path:         PathBuf,
    mode:         OpenMode,
    state:        ArchiveState,
    expected:     ExpectedDigests,
    verification: VerificationMode,
    algorithm:    DigestAlgorithm,
    defaults:     EntryOptions,
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self, ArchiveError> {
        Self::open_with(path, mode, ArchiveOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        opts: ArchiveOptions,
    ) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_owned();
        let container = match mode {
            OpenMode::Read => Container::open(File::open(&path)?)?,
            OpenMode::Write => Container::create(
                OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?,
            )?,
            OpenMode::Append => Container::append(
                OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?,
            )?,
        };
        info!(path = %path.display(), ?mode, entries = container.entries().len(), "opened archive");

        Ok(Self {
            path,
            mode,
            state:        ArchiveState::Open(container),
            expected:     ExpectedDigests::default(),
            verification: opts.verification,
            algorithm:    opts.algorithm,
            defaults:     opts.entry,
        })
    }

    // ── Verification settings ────────────────────────────────────────────────

    /// Record or replace what `name` must hash to. [`Expectation::Skip`]
    /// disables checking for that name, even in strict mode.
    pub fn register_expected_digest(
        &mut self,
        name:        impl Into<String>,
        expectation: Expectation,
    ) -> Option<Expectation> {
        self.expected.register(name, expectation)
    }

    pub fn unregister_expected_digest(&mut self, name: &str) -> Option<Expectation> {
        self.expected.unregister(name)
    }

    pub fn expected_digests(&self) -> &ExpectedDigests { &self.expected }

    pub fn set_verification_mode(&mut self, mode: VerificationMode) { self.verification = mode; }
    pub fn verification_mode(&self) -> VerificationMode { self.verification }

    pub fn algorithm(&self) -> &DigestAlgorithm { &self.algorithm }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Stream an entry. The verdict arrives with the end of the stream, see
    /// [`EntryReader`]. Works in every mode while the archive is open.
    pub fn open_entry(&mut self, name: &str) -> Result<EntryReader<'_>, ArchiveError> {
        let check = self.expected.resolve(name, self.verification);
        let algorithm = self.algorithm;
        self.container_mut()?.entry_reader(name, check, &algorithm)
    }

    /// Read a whole entry, verified.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut reader = self.open_entry(name)?;
        let mut out = Vec::with_capacity(reader.size().min(MAX_PREALLOCATION) as usize);
        io::Read::read_to_end(&mut reader, &mut out)?;
        Ok(out)
    }

    /// Extract every entry below `dest`, verifying each one. A file whose
    /// entry fails verification is removed before the error is returned.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<(), ArchiveError> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let records: Vec<EntryRecord> = self.list_entries().to_vec();
        for record in records {
            validate_name(&record.name)?;
            let target = dest.join(&record.name);
            if record.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            let copied = self
                .open_entry(&record.name)
                .and_then(|mut reader| Ok(io::copy(&mut reader, &mut out)?));
            if let Err(e) = copied {
                drop(out);
                if let Err(rm) = fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %rm, "could not remove rejected entry");
                }
                return Err(e);
            }
            #[cfg(unix)]
            if let Some(mode) = record.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }
        Ok(())
    }

    // ── Write ────────────────────────────────────────────────────────────────

    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<EntryRecord, ArchiveError> {
        let opts = self.defaults.clone();
        self.write_entry_with(name, data, &opts)
    }

    pub fn write_entry_with(
        &mut self,
        name: &str,
        data: &[u8],
        opts: &EntryOptions,
    ) -> Result<EntryRecord, ArchiveError> {
        self.writable()?.write_entry(name, data, opts)
    }

    /// Undo the most recent write of this session, index record and bytes.
    pub fn remove_last_entry(&mut self) -> Result<EntryRecord, ArchiveError> {
        self.writable()?.remove_last_entry()
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<(), ArchiveError> {
        self.writable()?.set_comment(comment)
    }

    /// Finalize the index and release the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        let mut container = match std::mem::replace(
            &mut self.state,
            ArchiveState::Closed(CentralDirectory::default()),
        ) {
            ArchiveState::Open(c) => c,
            closed => {
                self.state = closed;
                return Ok(());
            }
        };
        let result = container.finish();
        self.state = ArchiveState::Closed(container.into_index());
        result?;
        info!(path = %self.path.display(), entries = self.list_entries().len(), "closed archive");
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }
    pub fn mode(&self) -> OpenMode { self.mode }
    pub fn is_closed(&self) -> bool { matches!(self.state, ArchiveState::Closed(_)) }

    /// Current index, in physical order. Still available after `close`.
    pub fn list_entries(&self) -> &[EntryRecord] {
        match &self.state {
            ArchiveState::Open(c)     => c.entries(),
            ArchiveState::Closed(dir) => dir.records(),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&EntryRecord> {
        match &self.state {
            ArchiveState::Open(c)     => c.index().get(name),
            ArchiveState::Closed(dir) => dir.get(name),
        }
    }

    /// Entries written through this handle and still removable.
    pub fn session_entries(&self) -> usize {
        match &self.state {
            ArchiveState::Open(c) => c.writer_state().map_or(0, |s| s.session_entries),
            ArchiveState::Closed(_) => 0,
        }
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    fn container_mut(&mut self) -> Result<&mut Container<File>, ArchiveError> {
        match &mut self.state {
            ArchiveState::Open(c)   => Ok(c),
            ArchiveState::Closed(_) => Err(ArchiveError::Closed),
        }
    }

    fn writable(&mut self) -> Result<&mut Container<File>, ArchiveError> {
        if self.mode == OpenMode::Read {
            return Err(if self.is_closed() { ArchiveError::Closed } else { ArchiveError::ReadOnly });
        }
        self.container_mut()
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to finalize archive on drop");
        }
    }
}
