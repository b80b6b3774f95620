use std::fmt;
use std::str::FromStr;

use digest::Digest;

use crate::VerifyError;

pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

/// Adapts any RustCrypto [`Digest`] to [`Hasher`].
pub struct DigestHasher<D: Digest + Send>(D);

impl<D: Digest + Send> DigestHasher<D> {
    pub fn new() -> Self { Self(D::new()) }

    pub fn digest(data: &[u8]) -> Vec<u8> { D::digest(data).to_vec() }
}

impl<D: Digest + Send> Default for DigestHasher<D> {
    fn default() -> Self { Self::new() }
}

impl<D: Digest + Send> Hasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) { self.0.update(data); }
    fn finalize(self) -> Vec<u8> { self.0.finalize().to_vec() }
}

/// The closed set of checksum algorithms accepted from callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Digest length in bytes.
    pub fn digest_length(&self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 16,
            ChecksumAlgorithm::Sha1 => 20,
            ChecksumAlgorithm::Sha256 => 32,
        }
    }

    pub fn hasher(&self) -> AnyHasher {
        match self {
            ChecksumAlgorithm::Md5 => AnyHasher::Md5(DigestHasher::new()),
            ChecksumAlgorithm::Sha1 => AnyHasher::Sha1(DigestHasher::new()),
            ChecksumAlgorithm::Sha256 => AnyHasher::Sha256(DigestHasher::new()),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            _ => Err(VerifyError::AlgorithmInvalid(s.to_string())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A hasher for whichever [`ChecksumAlgorithm`] was selected at runtime.
pub enum AnyHasher {
    Md5(DigestHasher<md5::Md5>),
    Sha1(DigestHasher<sha1::Sha1>),
    Sha256(DigestHasher<sha2::Sha256>),
}

impl Hasher for AnyHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            AnyHasher::Md5(h) => h.update(data),
            AnyHasher::Sha1(h) => h.update(data),
            AnyHasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            AnyHasher::Md5(h) => h.finalize(),
            AnyHasher::Sha1(h) => h.finalize(),
            AnyHasher::Sha256(h) => h.finalize(),
        }
    }
}
