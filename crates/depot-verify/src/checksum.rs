use std::str::FromStr;

use crate::hasher::ChecksumAlgorithm;
use crate::{HashValidator, Result, VerifyError};

/// Caller-supplied checksum: an algorithm name plus the expected hex digest.
///
/// Both fields are kept as the caller gave them; the algorithm is only
/// resolved when a validator is built, so an unknown name fails at download
/// time rather than at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: String,
    pub value:     String,
}

impl Checksum {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value:     value.into(),
        }
    }

    /// Both fields empty means "no validation requested".
    pub fn is_empty(&self) -> bool { self.algorithm.is_empty() && self.value.is_empty() }

    pub fn algorithm(&self) -> Result<ChecksumAlgorithm> { self.algorithm.parse() }

    pub fn validator(&self) -> Result<HashValidator> { HashValidator::new(&self.algorithm) }
}

impl FromStr for Checksum {
    type Err = VerifyError;

    /// Parses `<algorithm>:<hex>`, e.g. `sha256:b94d27...`.
    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, value) = s
            .split_once(':')
            .ok_or_else(|| VerifyError::AlgorithmInvalid(s.to_string()))?;
        let checksum = Checksum::new(algorithm.trim(), value.trim());
        checksum.algorithm()?;
        Ok(checksum)
    }
}
