//! Codec registry for the two ZIP compression methods this crate speaks.
//!
//! Method numbers are the on-disk values from the ZIP application note:
//! `0` stored, `8` DEFLATE (raw, no zlib wrapper). Anything else is rejected
//! when an entry is opened; there is no fallback.
//!
//! Compression is whole-buffer (entry bytes are handed over complete), while
//! decompression is streaming so readers can hash as bytes come out.

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

use crate::error::ArchiveError;

/// Default DEFLATE level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

// ── CompressionMethod ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    #[inline]
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored   => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, ArchiveError> {
        match code {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflated),
            other => Err(ArchiveError::unsupported(format!("compression method {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::Stored   => "stored",
            CompressionMethod::Deflated => "deflated",
        }
    }
}

// ── CompressionPolicy ────────────────────────────────────────────────────────

/// How a writer picks the method for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPolicy {
    /// Deflate, but store instead when deflating does not shrink the entry.
    #[default]
    Auto,
    Deflate,
    Store,
}

impl CompressionPolicy {
    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto"    => Some(CompressionPolicy::Auto),
            "deflate" => Some(CompressionPolicy::Deflate),
            "store"   => Some(CompressionPolicy::Store),
            _         => None,
        }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec {
    fn method(&self) -> CompressionMethod;
    fn compress(&self, data: &[u8], level: u32) -> io::Result<Vec<u8>>;
    /// Wrap a reader over the compressed payload in an incremental decoder.
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a>;
}

pub struct StoredCodec;
impl Codec for StoredCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Stored }
    fn compress(&self, data: &[u8], _: u32) -> io::Result<Vec<u8>> { Ok(data.to_vec()) }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> { compressed }
}

pub struct DeflateCodec;
impl Codec for DeflateCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Deflated }
    fn compress(&self, data: &[u8], level: u32) -> io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, Compression::new(level.min(9)));
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        encoder.read_to_end(&mut out)?;
        Ok(out)
    }
    fn decoder<'a>(&self, compressed: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(DeflateDecoder::new(compressed))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(method: CompressionMethod) -> Box<dyn Codec> {
    match method {
        CompressionMethod::Stored   => Box::new(StoredCodec),
        CompressionMethod::Deflated => Box::new(DeflateCodec),
    }
}

/// Compress `data` according to `policy`, returning the method actually used.
pub fn compress(
    data:   &[u8],
    policy: CompressionPolicy,
    level:  u32,
) -> io::Result<(CompressionMethod, Vec<u8>)> {
    let codec: &dyn Codec = match policy {
        CompressionPolicy::Store   => &StoredCodec,
        CompressionPolicy::Deflate => &DeflateCodec,
        CompressionPolicy::Auto => {
            let deflated = DeflateCodec.compress(data, level)?;
            if deflated.len() < data.len() {
                return Ok((DeflateCodec.method(), deflated));
            }
            &StoredCodec
        }
    };
    Ok((codec.method(), codec.compress(data, level)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_stores_incompressible_data() {
        let (method, payload) = compress(b"abc", CompressionPolicy::Auto, 6).unwrap();
        assert_eq!(method, CompressionMethod::Stored);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn auto_deflates_repetitive_data() {
        let data = vec![b'x'; 4096];
        let (method, payload) = compress(&data, CompressionPolicy::Auto, 6).unwrap();
        assert_eq!(method, CompressionMethod::Deflated);
        assert!(payload.len() < data.len());

        let mut out = Vec::new();
        get_codec(method)
            .decoder(Box::new(&payload[..]))
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn forced_policies_report_their_method() {
        let data = vec![b'y'; 512];
        for (policy, expected) in [
            (CompressionPolicy::Store, CompressionMethod::Stored),
            (CompressionPolicy::Deflate, CompressionMethod::Deflated),
        ] {
            let (method, _) = compress(&data, policy, 6).unwrap();
            assert_eq!(method, expected);
            assert_eq!(get_codec(method).method(), method);
        }
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let err = CompressionMethod::from_code(12).unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(_)));
    }
}
