use crate::hasher::{AnyHasher, ChecksumAlgorithm, Hasher};
use crate::{Result, VerifyError};

/// Accumulates bytes as they stream past and compares the final digest
/// against an expected hex value.
pub struct HashValidator {
    algorithm: ChecksumAlgorithm,
    hasher:    AnyHasher,
}

impl HashValidator {
    /// Fails with [`VerifyError::AlgorithmInvalid`] for anything other than
    /// md5, sha1 or sha256.
    pub fn new(algorithm: &str) -> Result<Self> {
        Ok(Self::for_algorithm(algorithm.parse()?))
    }

    pub fn for_algorithm(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            hasher: algorithm.hasher(),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm { self.algorithm }

    pub fn update(&mut self, data: &[u8]) { self.hasher.update(data); }

    /// Hex comparison is case-insensitive. An empty expected value never
    /// validates.
    pub fn validate(self, expected: &str) -> Result<()> {
        let actual = hex::encode(self.hasher.finalize());
        let expected = expected.trim().to_ascii_lowercase();

        if expected.is_empty() || expected != actual {
            return Err(VerifyError::ChecksumInvalid { expected, actual });
        }
        Ok(())
    }
}
