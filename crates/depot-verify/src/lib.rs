//! Checksum validation for downloaded artifacts.
//!
//! Bytes are fed to a [`HashValidator`] as they are copied to disk, so an
//! artifact is hashed in the same pass that writes it. The supported
//! algorithms are fixed: md5, sha1 and sha256.
//!
//! # Example
//!
//! ```
//! use depot_verify::HashValidator;
//!
//! let mut validator = HashValidator::new("sha256").unwrap();
//! validator.update(b"hello world");
//! validator
//!     .validate("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
//!     .unwrap();
//! ```

pub use self::checksum::Checksum;
pub use self::error::{Result, VerifyError};
pub use self::hasher::{AnyHasher, ChecksumAlgorithm, DigestHasher, Hasher};
pub use self::validator::HashValidator;

mod checksum;
mod error;
mod hasher;
mod validator;
