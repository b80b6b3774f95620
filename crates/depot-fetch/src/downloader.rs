use std::io;
use std::time::{Duration, Instant};

use depot_verify::Checksum;
use futures_util::StreamExt;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::caching::CachingInfo;
use crate::error::{DownloadCancelled, FetchError, Result};
use crate::http::HttpClient;
use crate::options::DownloaderOptions;

/// Attempts per download, including the first.
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// A completed, verified download.
///
/// `path` is still a temporary file: it is removed when dropped unless the
/// caller moves it somewhere first.
#[derive(Debug)]
pub struct Downloaded {
    pub path:         TempPath,
    pub caching_info: CachingInfo,
    /// Bytes received from the server.
    pub bytes:        u64,
}

/// Fetches URLs into caller-created temp files, bounded by a global slot pool.
pub struct Downloader<C: HttpClient> {
    client:        C,
    slots:         Semaphore,
    idle_timeout:  Duration,
    retry_backoff: Duration,
}

impl<C: HttpClient> Downloader<C> {
    pub fn new(client: C, options: &DownloaderOptions) -> Self {
        Self {
            client,
            slots: Semaphore::new(options.max_concurrent.max(1)),
            idle_timeout: options.idle_timeout,
            retry_backoff: options.retry_backoff,
        }
    }

    pub fn client(&self) -> &C { &self.client }

    /// Pause after the zero-based failed `attempt`; doubles per attempt.
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .checked_mul(1 << attempt.min(31))
            .unwrap_or(Duration::MAX)
    }

    /// Download `url` unless the server reports it unchanged relative to
    /// `caching_info`, in which case `Ok(None)` is returned.
    ///
    /// Failed attempts are retried up to [`MAX_DOWNLOAD_ATTEMPTS`] times,
    /// except for cancellation and checksum failures. No file created by
    /// `create_destination` survives an error.
    pub async fn download<F>(
        &self,
        url: &Url,
        create_destination: F,
        caching_info: &CachingInfo,
        checksum: &Checksum,
        cancel: &CancellationToken,
    ) -> Result<Option<Downloaded>>
    where
        F: Fn() -> io::Result<NamedTempFile> + Send + Sync,
    {
        if !checksum.is_empty() {
            checksum.validator()?;
        }

        let started = Instant::now();
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DownloadCancelled::new("download-barrier", started.elapsed(), None).into());
            }
            permit = self.slots.acquire() => permit.map_err(|_| FetchError::SlotsClosed)?,
        };

        let mut attempt = 0;
        loop {
            match self
                .fetch_to_file(url, &create_destination, caching_info, checksum, cancel)
                .await
            {
                Err(e) if e.is_retryable() && attempt + 1 < MAX_DOWNLOAD_ATTEMPTS => {
                    warn!(url = %url, attempt = attempt + 1, error = %e, "download attempt failed, retrying");
                    let delay = self.backoff_after(attempt);
                    attempt += 1;

                    let backoff = Instant::now();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(DownloadCancelled::new("retry-backoff", backoff.elapsed(), None).into());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                result => return result,
            }
        }
    }

    async fn fetch_to_file<F>(
        &self,
        url: &Url,
        create_destination: &F,
        caching_info: &CachingInfo,
        checksum: &Checksum,
        cancel: &CancellationToken,
    ) -> Result<Option<Downloaded>>
    where
        F: Fn() -> io::Result<NamedTempFile> + Send + Sync,
    {
        let started = Instant::now();
        let headers = caching_info.conditional_headers();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DownloadCancelled::new("fetch-request", started.elapsed(), None).into());
            }
            response = self.client.get(url, &headers) => {
                response.map_err(|e| FetchError::Network(e.to_string()))?
            }
        };

        match response.status {
            304 => {
                debug!(url = %url, "remote content not modified");
                return Ok(None);
            }
            200 => {}
            status => return Err(FetchError::Status(status)),
        }

        let caching_info = CachingInfo::new(
            response.etag.unwrap_or_default(),
            response.last_modified.unwrap_or_default(),
        );
        let mut validator = if checksum.is_empty() {
            None
        } else {
            Some(checksum.validator()?)
        };

        let destination = create_destination()?;
        let mut file = tokio::fs::File::from_std(destination.as_file().try_clone()?);
        let mut body = response.body;
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DownloadCancelled::new("copy-body", started.elapsed(), Some(written)).into());
                }
                next = tokio::time::timeout(self.idle_timeout, body.next()) => {
                    next.map_err(|_| FetchError::IdleTimeout(self.idle_timeout))?
                }
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;

            file.write_all(&chunk).await?;
            if let Some(validator) = validator.as_mut() {
                validator.update(&chunk);
            }
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if let Some(validator) = validator {
            validator.validate(&checksum.value)?;
        }

        debug!(url = %url, bytes = written, elapsed = ?started.elapsed(), "download complete");
        Ok(Some(Downloaded {
            path: destination.into_temp_path(),
            caching_info,
            bytes: written,
        }))
    }
}
