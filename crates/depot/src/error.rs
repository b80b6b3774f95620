//! Error types for depot.

use std::io;

use depot_fetch::{DownloadCancelled, FetchError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("entry not found")]
    EntryNotFound,

    #[error("already closed directory")]
    AlreadyClosed,

    #[error("not cacheable directory")]
    NotCacheable,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("archive error: {0}")]
    Archive(#[from] depot_archive::Error),

    #[error("cache state error: {0}")]
    State(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The cancellation details, if this error is a cancelled download.
    pub fn cancelled(&self) -> Option<&DownloadCancelled> {
        match self {
            Self::Fetch(FetchError::Cancelled(cancelled)) => Some(cancelled),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool { self.cancelled().is_some() }
}

impl From<DownloadCancelled> for Error {
    fn from(e: DownloadCancelled) -> Self { Self::Fetch(FetchError::Cancelled(e)) }
}

pub type Result<T> = std::result::Result<T, Error>;
