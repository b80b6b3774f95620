use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use depot_fetch::DownloaderOptions;
use serde::Deserialize;

use crate::error::Result;

/// Settings for a [`CachedDownloader`](crate::CachedDownloader).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// cached_path = "/var/vcap/data/depot/cached"
/// uncached_path = "/var/vcap/data/depot/tmp"
/// max_size_bytes = 10737418240
/// ca_cert_files = ["/etc/ssl/internal-ca.pem"]
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cache root. Created with mode `0770` if missing.
    pub cached_path:              PathBuf,
    /// Staging directory for downloads in flight and uncached results.
    pub uncached_path:            PathBuf,
    pub max_size_bytes:           u64,
    pub max_concurrent_downloads: usize,
    pub download_timeout_secs:    u64,
    pub idle_timeout_secs:        u64,
    pub connect_timeout_secs:     u64,
    pub retry_backoff_ms:         u64,
    pub skip_ssl_verification:    bool,
    pub ca_cert_files:            Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let root = std::env::temp_dir().join("depot");
        Self {
            cached_path:              root.join("cached"),
            uncached_path:            root.join("uncached"),
            max_size_bytes:           1 << 30,
            max_concurrent_downloads: 10,
            download_timeout_secs:    600,
            idle_timeout_secs:        10,
            connect_timeout_secs:     10,
            retry_backoff_ms:         100,
            skip_ssl_verification:    false,
            ca_cert_files:            Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self { Self::default() }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn cached_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cached_path = path.into();
        self
    }

    pub fn uncached_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uncached_path = path.into();
        self
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout_secs = timeout.as_secs();
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = timeout.as_secs();
        self
    }

    pub fn retry_backoff(mut self, base: Duration) -> Self {
        self.retry_backoff_ms = base.as_millis() as u64;
        self
    }

    pub fn skip_ssl_verification(mut self, skip: bool) -> Self {
        self.skip_ssl_verification = skip;
        self
    }

    pub fn ca_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_files.push(path.into());
        self
    }

    pub fn downloader_options(&self) -> DownloaderOptions {
        DownloaderOptions {
            max_concurrent:        self.max_concurrent_downloads,
            timeout:               Duration::from_secs(self.download_timeout_secs),
            idle_timeout:          Duration::from_secs(self.idle_timeout_secs),
            connect_timeout:       Duration::from_secs(self.connect_timeout_secs),
            retry_backoff:         Duration::from_millis(self.retry_backoff_ms),
            skip_ssl_verification: self.skip_ssl_verification,
            ca_cert_files:         self.ca_cert_files.clone(),
        }
    }
}
