//! Tree → archive packaging with installer-friendly entry order.
//!
//! Payload files are written in discovery order. Files under a metadata
//! directory (a directory whose name ends in [`MetadataLayout::suffix`]) are
//! held back and written last, ordered by [`MetadataLayout::priority`], so
//! the content record is the final entry and every other entry's position is
//! fixed before it is computed.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{Archive, ArchiveOptions, OpenMode};
use crate::codec::{CompressionPolicy, DEFAULT_COMPRESSION_LEVEL};
use crate::error::ArchiveError;
use crate::header::DosDateTime;
use crate::io_stream::{EntryOptions, DEFAULT_UNIX_MODE};
use crate::record::ContentRecord;
use crate::verify::DigestAlgorithm;

pub const METADATA_SUFFIX: &str = ".dist-info";

// ── MetadataLayout ───────────────────────────────────────────────────────────

/// Names that make up the metadata directory convention.
#[derive(Debug, Clone)]
pub struct MetadataLayout {
    pub suffix:   String,
    pub manifest: String,
    pub metadata: String,
    pub record:   String,
}

impl Default for MetadataLayout {
    fn default() -> Self {
        Self {
            suffix:   METADATA_SUFFIX.to_owned(),
            manifest: "WHEEL".to_owned(),
            metadata: "METADATA".to_owned(),
            record:   "RECORD".to_owned(),
        }
    }
}

impl MetadataLayout {
    /// Ordering score inside the metadata directory; higher goes later.
    pub fn priority(&self, file_name: &str) -> u8 {
        if file_name == self.manifest {
            1
        } else if file_name == self.metadata {
            2
        } else if file_name == self.record {
            3
        } else {
            0
        }
    }

    /// The metadata directory `name` lives under, as an entry-name prefix
    /// without trailing slash.
    pub fn metadata_dir<'a>(&self, name: &'a str) -> Option<&'a str> {
        let (parent, _) = name.rsplit_once('/')?;
        let mut end = 0;
        for component in parent.split('/') {
            end += component.len();
            if component.ends_with(self.suffix.as_str()) {
                return Some(&name[..end]);
            }
            end += 1;
        }
        None
    }

    pub fn is_metadata(&self, name: &str) -> bool {
        self.metadata_dir(name).is_some()
    }
}

// ── Planning ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    /// Entry name, `/`-separated, relative to the source root.
    pub name: String,
    pub path: PathBuf,
}

/// Payload entries first, in the given order; then metadata-directory
/// entries, stably sorted by priority.
pub fn order_entries(entries: Vec<PlannedEntry>, layout: &MetadataLayout) -> Vec<PlannedEntry> {
    let (mut deferred, mut ordered): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| layout.is_metadata(&e.name));

    deferred.sort_by_key(|e| {
        let file_name = e.name.rsplit('/').next().unwrap_or(&e.name);
        layout.priority(file_name)
    });
    ordered.extend(deferred);
    ordered
}

/// Walk `source_root` once and return its regular files in archive order.
pub fn plan(source_root: &Path, layout: &MetadataLayout) -> Result<Vec<PlannedEntry>, ArchiveError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(source_root).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_root)
            .map_err(|_| ArchiveError::InvalidEntryName(entry.path().display().to_string()))?;
        found.push(PlannedEntry {
            name: entry_name(relative)?,
            path: entry.path().to_owned(),
        });
    }
    Ok(order_entries(found, layout))
}

/// Relative path → entry name with forward slashes on every platform.
pub fn entry_name(relative: &Path) -> Result<String, ArchiveError> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| ArchiveError::InvalidEntryName(relative.display().to_string()))?,
            ),
            Component::CurDir => {}
            _ => return Err(ArchiveError::InvalidEntryName(relative.display().to_string())),
        }
    }
    Ok(parts.join("/"))
}

// ── BuildOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`ArchiveBuilder`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub compression:       CompressionPolicy,
    pub level:             u32,
    pub layout:            MetadataLayout,
    /// Pins every entry timestamp (seconds since the Unix epoch, UTC).
    pub source_date_epoch: Option<i64>,
    /// Generate the content record instead of copying one from the tree.
    pub content_record:    bool,
    pub algorithm:         DigestAlgorithm,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compression:       CompressionPolicy::Auto,
            level:             DEFAULT_COMPRESSION_LEVEL,
            layout:            MetadataLayout::default(),
            source_date_epoch: None,
            content_record:    false,
            algorithm:         DigestAlgorithm::sha256(),
        }
    }
}

// ── ArchiveBuilder ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    opts: BuildOptions,
}

impl ArchiveBuilder {
    pub fn new(opts: BuildOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &BuildOptions { &self.opts }

    /// Package every regular file below `source_root` into `dest`,
    /// overwriting it. If writing fails after `dest` was opened it is
    /// removed; a `dest` that could not be opened is left alone.
    pub fn build<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source_root: P,
        dest:        Q,
    ) -> Result<PathBuf, ArchiveError> {
        let source_root = source_root.as_ref();
        let dest = dest.as_ref();
        if !fs::metadata(source_root)?.is_dir() {
            return Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", source_root.display()),
            )));
        }

        let entries = plan(source_root, &self.opts.layout)?;
        let archive = Archive::open_with(dest, OpenMode::Write, ArchiveOptions {
            algorithm: self.opts.algorithm,
            ..ArchiveOptions::default()
        })?;
        // From here on `dest` is ours to remove.
        match self.write_entries(archive, &entries) {
            Ok(count) => {
                info!(dest = %dest.display(), entries = count, "built archive");
                Ok(dest.to_owned())
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(dest) {
                    if rm.kind() != io::ErrorKind::NotFound {
                        warn!(dest = %dest.display(), error = %rm, "could not remove partial archive");
                    }
                }
                Err(e)
            }
        }
    }

    fn write_entries(&self, mut archive: Archive, entries: &[PlannedEntry]) -> Result<usize, ArchiveError> {
        let layout = &self.opts.layout;

        let record_name = if self.opts.content_record {
            let dir = entries.iter().find_map(|e| layout.metadata_dir(&e.name));
            if dir.is_none() {
                warn!("no metadata directory found; content record not generated");
            }
            dir.map(|d| format!("{d}/{}", layout.record))
        } else {
            None
        };
        let mut record = record_name.as_ref().map(|_| ContentRecord::default());

        for entry in entries {
            if record_name.as_deref() == Some(entry.name.as_str()) {
                debug!(entry = %entry.name, "skipping content record from source tree");
                continue;
            }
            let data = fs::read(&entry.path)?;
            let opts = self.entry_options(&entry.path)?;
            archive.write_entry_with(&entry.name, &data, &opts)?;
            if let Some(record) = record.as_mut() {
                record.push_entry(&entry.name, &data, &self.opts.algorithm);
            }
        }

        if let (Some(mut record), Some(name)) = (record, record_name) {
            record.push_unhashed(&name);
            let opts = EntryOptions {
                modified: self.timestamp_or(DosDateTime::from_naive(Local::now().naive_local())),
                ..self.base_entry_options()
            };
            archive.write_entry_with(&name, &record.to_bytes(), &opts)?;
        }

        let count = archive.list_entries().len();
        archive.close()?;
        Ok(count)
    }

    fn base_entry_options(&self) -> EntryOptions {
        EntryOptions {
            compression: self.opts.compression,
            level:       self.opts.level,
            ..EntryOptions::default()
        }
    }

    fn timestamp_or(&self, fallback: DosDateTime) -> DosDateTime {
        self.opts
            .source_date_epoch
            .map_or(fallback, DosDateTime::from_unix_timestamp)
    }

    fn entry_options(&self, path: &Path) -> Result<EntryOptions, ArchiveError> {
        let meta = fs::metadata(path)?;
        let mtime = DosDateTime::from_naive(DateTime::<Local>::from(meta.modified()?).naive_local());

        #[cfg(unix)]
        let unix_mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let unix_mode = DEFAULT_UNIX_MODE;

        Ok(EntryOptions {
            modified:  self.timestamp_or(mtime),
            unix_mode: if unix_mode == 0 { DEFAULT_UNIX_MODE } else { unix_mode },
            ..self.base_entry_options()
        })
    }
}
