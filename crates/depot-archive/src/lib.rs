//! Archive normalization and tar expansion for cached artifacts.
//!
//! # Architecture
//!
//! - `format.rs` - Format detection and tar decompression
//! - `sanitize.rs` - Path sanitization (zip-slip prevention)
//! - `transform.rs` - Post-download transforms into a canonical `.tar`
//! - `expand.rs` - Tar-to-directory expansion

pub use error::{Error, Result};
pub use expand::extract_tar_to_directory;
pub use format::{ArchiveFormat, TarCompress, detect_format, detect_from_path};
pub use sanitize::{SanitizedPath, sanitize_path, sanitize_symlink_target};
pub use transform::{Transformer, noop_transform, tar_transform};

mod error;
mod expand;
mod format;
mod sanitize;
mod transform;
