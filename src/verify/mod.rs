//! Expected-digest bookkeeping for verified reads.
//!
//! An entry name is in one of three states in [`ExpectedDigests`]:
//! never registered, registered with a digest, or registered as
//! [`Expectation::Skip`]. The last two are explicit decisions by the caller;
//! only the first is affected by [`VerificationMode`].

pub mod stream;

use digest::DynDigest;
use sha2::{Sha256, Sha384, Sha512};
use std::collections::HashMap;
use std::fmt;

pub use stream::EntryReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Entry bytes must hash to exactly this value.
    Digest(Vec<u8>),
    /// Read without checking, even in strict mode.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMode {
    /// Entries without an expectation are returned unchecked.
    #[default]
    Lenient,
    /// Every entry needs an expectation; a missing one is an integrity error.
    Strict,
}

/// What an entry stream does once its bytes are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Pass,
    Compare(Vec<u8>),
    RejectUnregistered,
}

impl Check {
    pub fn needs_digest(&self) -> bool {
        matches!(self, Check::Compare(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpectedDigests {
    table: HashMap<String, Expectation>,
}

impl ExpectedDigests {
    /// Record or replace the expectation for `name`. Returns the previous one.
    pub fn register(&mut self, name: impl Into<String>, expectation: Expectation) -> Option<Expectation> {
        self.table.insert(name.into(), expectation)
    }

    /// Return `name` to the never-registered state.
    pub fn unregister(&mut self, name: &str) -> Option<Expectation> {
        self.table.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Expectation> {
        self.table.get(name)
    }

    pub fn len(&self) -> usize      { self.table.len() }
    pub fn is_empty(&self) -> bool  { self.table.is_empty() }

    pub fn resolve(&self, name: &str, mode: VerificationMode) -> Check {
        match (self.table.get(name), mode) {
            (Some(Expectation::Digest(d)), _)         => Check::Compare(d.clone()),
            (Some(Expectation::Skip), _)              => Check::Pass,
            (None, VerificationMode::Lenient)         => Check::Pass,
            (None, VerificationMode::Strict)          => Check::RejectUnregistered,
        }
    }
}

// ── DigestAlgorithm ──────────────────────────────────────────────────────────

/// A named, caller-injectable hash function. Comparison is on raw bytes, so
/// any fixed-length digest works.
#[derive(Clone, Copy)]
pub struct DigestAlgorithm {
    name:    &'static str,
    factory: fn() -> Box<dyn DynDigest>,
}

fn sha256_hasher() -> Box<dyn DynDigest> { Box::new(Sha256::default()) }
fn sha384_hasher() -> Box<dyn DynDigest> { Box::new(Sha384::default()) }
fn sha512_hasher() -> Box<dyn DynDigest> { Box::new(Sha512::default()) }

impl DigestAlgorithm {
    pub const fn new(name: &'static str, factory: fn() -> Box<dyn DynDigest>) -> Self {
        Self { name, factory }
    }

    pub const fn sha256() -> Self { Self::new("sha256", sha256_hasher) }
    pub const fn sha384() -> Self { Self::new("sha384", sha384_hasher) }
    pub const fn sha512() -> Self { Self::new("sha512", sha512_hasher) }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::sha256()),
            "sha384" => Some(Self::sha384()),
            "sha512" => Some(Self::sha512()),
            _        => None,
        }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn hasher(&self) -> Box<dyn DynDigest> { (self.factory)() }

    pub fn output_size(&self) -> usize { self.hasher().output_size() }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut h = self.hasher();
        h.update(data);
        h.finalize().into_vec()
    }
}

impl Default for DigestAlgorithm {
    fn default() -> Self { Self::sha256() }
}

impl fmt::Debug for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DigestAlgorithm").field(&self.name).finish()
    }
}
