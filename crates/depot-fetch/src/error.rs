//! Error types for depot-fetch.

use std::fmt;
use std::io;
use std::time::Duration;

use depot_verify::VerifyError;
use thiserror::Error;

/// A download stopped because the caller's cancellation token fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadCancelled {
    /// Phase that observed the cancellation, e.g. `copy-body`.
    pub phase:    &'static str,
    pub duration: Duration,
    /// Bytes received before cancellation; `None` if none were received yet.
    pub written:  Option<u64>,
}

impl DownloadCancelled {
    pub fn new(phase: &'static str, duration: Duration, written: Option<u64>) -> Self {
        Self {
            phase,
            duration,
            written,
        }
    }
}

impl fmt::Display for DownloadCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "download cancelled: source '{}', duration '{:?}'",
            self.phase, self.duration
        )?;
        if let Some(written) = self.written {
            write!(f, ", bytes '{written}'")?;
        }
        Ok(())
    }
}

impl std::error::Error for DownloadCancelled {}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Cancelled(#[from] DownloadCancelled),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error("download failed: status code {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("download slots closed")]
    SlotsClosed,

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Cancellation and checksum failures are terminal; everything else may
    /// succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled(_) | Self::Verify(_) | Self::SlotsClosed)
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled(_)) }
}

pub type Result<T> = std::result::Result<T, FetchError>;
