use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wheelzip::archive::{Archive, ArchiveOptions, OpenMode};
use wheelzip::builder::{ArchiveBuilder, BuildOptions, MetadataLayout};
use wheelzip::codec::{CompressionPolicy, DEFAULT_COMPRESSION_LEVEL};
use wheelzip::record::{seal_content_record, verify_archive};
use wheelzip::verify::{DigestAlgorithm, VerificationMode};

#[derive(Parser)]
#[command(name = "wheelzip", about = "Build and verify wheel archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory tree into a wheel archive
    Pack {
        source: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// auto (default), deflate, store
        #[arg(short, long, default_value = "auto")]
        compression: String,
        /// DEFLATE level 0-9
        #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
        level: u32,
        /// Generate RECORD instead of copying it from the tree
        #[arg(short, long)]
        record: bool,
        /// Metadata directory suffix
        #[arg(long, default_value = wheelzip::builder::METADATA_SUFFIX)]
        suffix: String,
        /// Pin every entry timestamp (seconds since the Unix epoch)
        #[arg(long, env = "SOURCE_DATE_EPOCH")]
        source_date_epoch: Option<i64>,
    },
    /// List archive contents
    List {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check every entry against the archive's RECORD
    Verify {
        input: PathBuf,
        /// Fail on entries RECORD does not list
        #[arg(short, long)]
        strict: bool,
        /// Path of RECORD inside the archive (found automatically if omitted)
        #[arg(long)]
        record_name: Option<String>,
        #[arg(long, default_value = "sha256")]
        algorithm: String,
    },
    /// Recompute RECORD and append it as the last entry
    Seal {
        input: PathBuf,
        #[arg(long)]
        record_name: String,
        #[arg(long, default_value = "sha256")]
        algorithm: String,
    },
    /// Unpack an archive, verifying against RECORD when present
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        strict: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { source, output, compression, level, record, suffix, source_date_epoch } => {
            let opts = BuildOptions {
                compression: parse_policy(&compression),
                level,
                layout: MetadataLayout { suffix, ..MetadataLayout::default() },
                source_date_epoch,
                content_record: record,
                ..BuildOptions::default()
            };
            let dest = ArchiveBuilder::new(opts).build(&source, &output)?;
            println!("Created: {}", dest.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let ar = Archive::open(&input, OpenMode::Read)?;
            if json {
                println!("{}", serde_json::to_string_pretty(ar.list_entries())?);
                return Ok(());
            }
            println!("Archive: {}", input.display());
            println!("{:<48} {:>12} {:>12} {:>8}  Modified", "Name", "Size", "Compressed", "Method");
            for e in ar.list_entries() {
                let modified = e
                    .modified
                    .to_naive()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:<48} {:>12} {:>12} {:>8}  {}",
                    e.name, e.uncompressed_size, e.compressed_size, e.method.name(), modified);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input, strict, record_name, algorithm } => {
            let mut ar = Archive::open_with(&input, OpenMode::Read, ArchiveOptions {
                verification: mode(strict),
                algorithm:    parse_algorithm(&algorithm)?,
                ..ArchiveOptions::default()
            })?;
            let record_name = match record_name.or_else(|| find_record(&ar)) {
                Some(name) => name,
                None => return Err(format!("{}: no RECORD found", input.display()).into()),
            };
            let summary = verify_archive(&mut ar, &record_name)?;
            println!("OK: {} verified, {} unchecked", summary.verified, summary.unchecked);
        }

        // ── Seal ─────────────────────────────────────────────────────────────
        Commands::Seal { input, record_name, algorithm } => {
            let mut ar = Archive::open_with(&input, OpenMode::Append, ArchiveOptions {
                algorithm: parse_algorithm(&algorithm)?,
                ..ArchiveOptions::default()
            })?;
            let written = seal_content_record(&mut ar, &record_name)?;
            ar.close()?;
            println!("Sealed: {} ({} B)", written.name, written.uncompressed_size);
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir, strict } => {
            let mut ar = Archive::open_with(&input, OpenMode::Read, ArchiveOptions {
                verification: mode(strict),
                ..ArchiveOptions::default()
            })?;
            if let Some(record_name) = find_record(&ar) {
                verify_archive(&mut ar, &record_name)?;
            }
            ar.extract_all(&output_dir)?;
            println!("Unpacked to: {}", output_dir.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn mode(strict: bool) -> VerificationMode {
    if strict { VerificationMode::Strict } else { VerificationMode::Lenient }
}

fn parse_policy(s: &str) -> CompressionPolicy {
    CompressionPolicy::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown compression '{}', defaulting to auto", s);
        CompressionPolicy::Auto
    })
}

fn parse_algorithm(s: &str) -> Result<DigestAlgorithm, String> {
    DigestAlgorithm::from_name(s).ok_or_else(|| format!("unknown digest algorithm '{s}'"))
}

/// The RECORD of the first metadata directory in the archive.
fn find_record(ar: &Archive) -> Option<String> {
    let layout = MetadataLayout::default();
    ar.list_entries()
        .iter()
        .find(|e| {
            Path::new(&e.name).file_name().is_some_and(|f| f == layout.record.as_str())
                && layout.is_metadata(&e.name)
        })
        .map(|e| e.name.clone())
}
