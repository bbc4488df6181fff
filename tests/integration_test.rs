use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;
use wheelzip::archive::{Archive, OpenMode};
use wheelzip::codec::{CompressionMethod, CompressionPolicy};
use wheelzip::error::{ArchiveError, ErrorKind};
use wheelzip::io_stream::EntryOptions;
use wheelzip::verify::{DigestAlgorithm, Expectation, VerificationMode};

fn sha256(data: &[u8]) -> Vec<u8> {
    DigestAlgorithm::sha256().digest(data)
}

fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let mut ar = Archive::open(path, OpenMode::Write).unwrap();
    for (name, data) in entries {
        ar.write_entry(name, data).unwrap();
    }
    ar.close().unwrap();
}

fn names(ar: &Archive) -> Vec<String> {
    ar.list_entries().iter().map(|e| e.name.clone()).collect()
}

#[test]
fn test_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("round.whl");
    let big: Vec<u8> = b"payload line\n".repeat(5000);
    write_archive(&path, &[("small.txt", b"hi"), ("pkg/big.txt", &big), ("empty", b"")]);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert_eq!(names(&ar), ["small.txt", "pkg/big.txt", "empty"]);
    assert_eq!(ar.read_entry("small.txt").unwrap(), b"hi");
    assert_eq!(ar.read_entry("pkg/big.txt").unwrap(), big);
    assert_eq!(ar.read_entry("empty").unwrap(), b"");
    assert_eq!(ar.entry("pkg/big.txt").unwrap().method, CompressionMethod::Deflated);
}

#[test]
fn test_one_two_three_scenario() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.whl");
    write_archive(&path, &[
        ("one", b"first file"),
        ("two", b"second file"),
        ("three", b"third file"),
    ]);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    ar.register_expected_digest("one", Expectation::Digest(sha256(b"first file")));
    ar.register_expected_digest("three", Expectation::Digest(sha256(b"not the third file")));

    assert_eq!(ar.read_entry("one").unwrap(), b"first file");
    assert_eq!(ar.read_entry("two").unwrap(), b"second file");
    let err = ar.read_entry("three").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(matches!(err, ArchiveError::DigestMismatch { ref name, .. } if name == "three"));

    ar.set_verification_mode(VerificationMode::Strict);
    let err = ar.read_entry("two").unwrap_err();
    assert!(matches!(err, ArchiveError::Unverified { .. }));
    assert!(err.is_integrity());
    assert_eq!(ar.read_entry("one").unwrap(), b"first file");

    ar.register_expected_digest("two", Expectation::Skip);
    assert_eq!(ar.read_entry("two").unwrap(), b"second file");
    assert!(ar.read_entry("three").unwrap_err().is_integrity());
}

#[test]
fn test_verdict_arrives_with_last_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.whl");
    let data = vec![7u8; 100_000];
    write_archive(&path, &[("blob", &data)]);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    ar.register_expected_digest("blob", Expectation::Digest(sha256(b"other")));
    let mut reader = ar.open_entry("blob").unwrap();
    let mut buf = [0u8; 1024];
    let mut total = 0;
    let err = loop {
        match reader.read(&mut buf) {
            Ok(0) => panic!("stream ended without a verdict"),
            Ok(n) => total += n,
            Err(e) => break e,
        }
    };
    assert!(total < data.len());
    assert!(ArchiveError::from(err).is_integrity());
    assert!(reader.read(&mut buf).is_err());
}

#[test]
fn test_read_exact_of_recorded_size_is_verified() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exact.whl");
    write_archive(&path, &[("two", b"second file"), ("three", b"third file")]);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    ar.register_expected_digest("three", Expectation::Digest(sha256(b"not the third file")));
    let mut reader = ar.open_entry("three").unwrap();
    let mut buf = vec![0u8; reader.size() as usize];
    let err = reader.read_exact(&mut buf).unwrap_err();
    assert!(matches!(ArchiveError::from(err), ArchiveError::DigestMismatch { .. }));
    drop(reader);

    ar.register_expected_digest("three", Expectation::Digest(sha256(b"third file")));
    let mut reader = ar.open_entry("three").unwrap();
    let mut buf = vec![0u8; reader.size() as usize];
    reader.read_exact(&mut buf).unwrap();
    assert!(reader.is_verified());
    assert_eq!(buf, b"third file");
    assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    drop(reader);

    ar.set_verification_mode(VerificationMode::Strict);
    let mut reader = ar.open_entry("two").unwrap();
    let mut buf = vec![0u8; reader.size() as usize];
    let err = reader.read_exact(&mut buf).unwrap_err();
    assert!(matches!(ArchiveError::from(err), ArchiveError::Unverified { .. }));
    drop(reader);

    let mut reader = ar.open_entry("two").unwrap();
    let size = reader.size();
    let mut limited = Vec::new();
    let err = (&mut reader).take(size).read_to_end(&mut limited).unwrap_err();
    assert!(ArchiveError::from(err).is_integrity());
}

#[test]
fn test_remove_last_entry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pop.whl");

    let mut ar = Archive::open(&path, OpenMode::Write).unwrap();
    ar.write_entry("A", b"alpha").unwrap();
    ar.write_entry("B", b"bravo").unwrap();
    let removed = ar.remove_last_entry().unwrap();
    assert_eq!(removed.name, "B");
    assert_eq!(names(&ar), ["A"]);
    ar.close().unwrap();

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert_eq!(names(&ar), ["A"]);
    assert_eq!(ar.read_entry("A").unwrap(), b"alpha");
}

#[test]
fn test_pop_and_rewrite_matches_direct_write() {
    let dir = TempDir::new().unwrap();
    let direct = dir.path().join("direct.whl");
    let popped = dir.path().join("popped.whl");
    write_archive(&direct, &[("A", b"alpha"), ("RECORD", b"final")]);

    let mut ar = Archive::open(&popped, OpenMode::Write).unwrap();
    ar.write_entry("A", b"alpha").unwrap();
    ar.write_entry("RECORD", &b"draft".repeat(1000)).unwrap();
    ar.remove_last_entry().unwrap();
    ar.write_entry("RECORD", b"final").unwrap();
    ar.close().unwrap();

    assert_eq!(fs::read(&direct).unwrap(), fs::read(&popped).unwrap());
}

#[test]
fn test_remove_needs_a_write_in_this_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.whl");
    write_archive(&path, &[("A", b"alpha")]);

    let mut ar = Archive::open(&path, OpenMode::Append).unwrap();
    let err = ar.remove_last_entry().unwrap_err();
    assert!(matches!(err, ArchiveError::NothingToRemove));
    assert!(err.is_state());
    ar.close().unwrap();

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert!(matches!(ar.remove_last_entry().unwrap_err(), ArchiveError::ReadOnly));
    assert!(ar.write_entry("B", b"b").unwrap_err().is_state());
    assert_eq!(names(&ar), ["A"]);
}

#[test]
fn test_operations_after_close() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("closed.whl");

    let mut ar = Archive::open(&path, OpenMode::Write).unwrap();
    ar.write_entry("A", b"alpha").unwrap();
    ar.close().unwrap();
    ar.close().unwrap();

    assert!(ar.is_closed());
    assert_eq!(names(&ar), ["A"]);
    for err in [
        ar.write_entry("B", b"b").unwrap_err(),
        ar.remove_last_entry().unwrap_err(),
        ar.read_entry("A").unwrap_err(),
    ] {
        assert!(matches!(err, ArchiveError::Closed), "{err}");
        assert_eq!(err.kind(), ErrorKind::State);
    }
}

#[test]
fn test_duplicate_and_missing_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.whl");

    let mut ar = Archive::open(&path, OpenMode::Write).unwrap();
    ar.write_entry("A", b"alpha").unwrap();
    assert!(matches!(ar.write_entry("A", b"again").unwrap_err(), ArchiveError::DuplicateEntry(_)));
    assert!(matches!(ar.write_entry("../evil", b"x").unwrap_err(), ArchiveError::InvalidEntryName(_)));
    assert_eq!(ar.read_entry("nope").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_append_reopen_keeps_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("append.whl");
    write_archive(&path, &[("A", b"alpha")]);

    let mut ar = Archive::open(&path, OpenMode::Append).unwrap();
    ar.write_entry("B", b"bravo").unwrap();
    assert_eq!(ar.read_entry("A").unwrap(), b"alpha");
    ar.close().unwrap();

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert_eq!(names(&ar), ["A", "B"]);
    assert_eq!(ar.read_entry("B").unwrap(), b"bravo");
}

#[test]
fn test_append_to_missing_file_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.whl");

    let mut ar = Archive::open(&path, OpenMode::Append).unwrap();
    assert!(ar.list_entries().is_empty());
    ar.write_entry("A", b"alpha").unwrap();
    drop(ar);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert_eq!(ar.read_entry("A").unwrap(), b"alpha");
}

#[test]
fn test_crc_corruption_is_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crc.whl");

    let stored = EntryOptions { compression: CompressionPolicy::Store, ..EntryOptions::default() };
    let mut ar = Archive::open(&path, OpenMode::Write).unwrap();
    let record = ar.write_entry_with("data.txt", b"hello world", &stored).unwrap();
    ar.close().unwrap();

    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(record.header_offset + 30 + "data.txt".len() as u64)).unwrap();
    file.write_all(b"J").unwrap();
    drop(file);

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    let err = ar.read_entry("data.txt").unwrap_err();
    assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }), "{err}");
    assert!(err.is_format());

    ar.register_expected_digest("data.txt", Expectation::Skip);
    assert!(ar.read_entry("data.txt").unwrap_err().is_format());
}

#[test]
fn test_garbage_is_not_an_archive() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.whl");
    fs::write(&path, b"definitely not a zip file").unwrap();

    let err = Archive::open(&path, OpenMode::Read).err().unwrap();
    assert!(err.is_format());
}

#[test]
fn test_extract_all_verifies() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("extract.whl");
    write_archive(&path, &[("pkg/__init__.py", b""), ("pkg/mod.py", b"x = 1\n")]);

    let out = dir.path().join("out");
    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    ar.extract_all(&out).unwrap();
    assert_eq!(fs::read(out.join("pkg/mod.py")).unwrap(), b"x = 1\n");

    ar.set_verification_mode(VerificationMode::Strict);
    let strict = dir.path().join("strict");
    let err = ar.extract_all(&strict).unwrap_err();
    assert!(err.is_integrity());
    assert!(!strict.join("pkg/__init__.py").exists());
}

#[test]
fn test_extract_all_removes_tampered_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tampered.whl");
    write_archive(&path, &[("ok.txt", b"fine"), ("bad.txt", b"tampered contents")]);

    let out = dir.path().join("out");
    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    ar.register_expected_digest("bad.txt", Expectation::Digest(sha256(b"original contents")));
    let err = ar.extract_all(&out).unwrap_err();
    assert!(matches!(err, ArchiveError::DigestMismatch { ref name, .. } if name == "bad.txt"));
    assert_eq!(fs::read(out.join("ok.txt")).unwrap(), b"fine");
    assert!(!out.join("bad.txt").exists());
}

#[test]
fn test_oversized_recorded_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge.whl");
    let stored = EntryOptions { compression: CompressionPolicy::Store, ..EntryOptions::default() };
    let mut ar = Archive::open(&path, OpenMode::Write).unwrap();
    ar.write_entry_with("a", b"small", &stored).unwrap();
    ar.close().unwrap();

    // Uncompressed size field of the central header: 46-byte header start + 24.
    let bytes = fs::read(&path).unwrap();
    let cd = bytes.len() - 22 - 46 - 1;
    let mut patched = bytes.clone();
    patched[cd + 24..cd + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
    fs::write(&path, patched).unwrap();

    let mut ar = Archive::open(&path, OpenMode::Read).unwrap();
    assert_eq!(ar.entry("a").unwrap().uncompressed_size, 0xFFFF_FFF0);
    assert!(ar.read_entry("a").unwrap_err().is_format());
}
