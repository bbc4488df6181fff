pub mod error;
pub mod header;
pub mod trailer;
pub mod codec;
pub mod index;
pub mod io_stream;
pub mod verify;
pub mod archive;
pub mod builder;
pub mod record;

pub use error::{ArchiveError, ErrorKind};
pub use codec::{CompressionMethod, CompressionPolicy, get_codec};
pub use index::{CentralDirectory, EntryRecord};
pub use io_stream::{Container, EntryOptions};
pub use verify::{DigestAlgorithm, EntryReader, Expectation, VerificationMode};
pub use archive::{Archive, ArchiveOptions, OpenMode};
pub use builder::{ArchiveBuilder, BuildOptions, MetadataLayout};
pub use record::{seal_content_record, verify_archive, ContentRecord, VerifySummary};
