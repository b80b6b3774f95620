use std::path::PathBuf;
use std::time::Duration;

/// Transport and scheduling settings for a [`Downloader`](crate::Downloader)
/// and its [`ReqwestClient`](crate::ReqwestClient).
#[derive(Clone, Debug)]
pub struct DownloaderOptions {
    /// Size of the global download slot pool.
    pub max_concurrent:        usize,
    /// Whole-request timeout.
    pub timeout:               Duration,
    /// Longest tolerated gap between two body chunks.
    pub idle_timeout:          Duration,
    pub connect_timeout:       Duration,
    pub retry_backoff:         Duration,
    pub skip_ssl_verification: bool,
    /// PEM files added to the trusted roots.
    pub ca_cert_files:         Vec<PathBuf>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            max_concurrent:        10,
            timeout:               Duration::from_secs(600),
            idle_timeout:          Duration::from_secs(10),
            connect_timeout:       Duration::from_secs(10),
            retry_backoff:         Duration::from_millis(100),
            skip_ssl_verification: false,
            ca_cert_files:         Vec::new(),
        }
    }
}
