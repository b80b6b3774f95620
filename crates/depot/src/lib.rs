//! Reference-counted, disk-backed download cache.
//!
//! # Architecture
//!
//! - [`FileCache`] - size-bounded LRU table of cached files and their expanded directories
//! - [`CachedFile`] - open handle that pins its content until closed
//! - [`CachedDownloader`] - per-key serialized fetches through the cache with conditional GETs
//! - [`Config`] - directories, budget, and transport settings
//!
//! # Example
//!
//! ```no_run
//! use depot::{CachedDownloader, Checksum, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> depot::Result<()> {
//! let config = Config::new().cached_path("/tmp/depot/cached").max_size_bytes(1 << 30);
//! let downloader = CachedDownloader::from_config(&config)?;
//! downloader.recover_state()?;
//!
//! let url = "https://example.com/droplet.tgz".parse().expect("valid url");
//! let cancel = CancellationToken::new();
//! let (dir, downloaded) = downloader
//!     .fetch_as_directory(&url, "droplet-guid", &Checksum::default(), &cancel)
//!     .await?;
//! println!("{} ({downloaded} bytes fetched)", dir.display());
//! downloader.close_directory("droplet-guid", &dir)?;
//!
//! downloader.save_state()?;
//! # Ok(())
//! # }
//! ```

mod cached_downloader;
mod cached_file;
mod config;
mod error;
mod file_cache;
mod gate;
mod persist;

pub use cached_downloader::CachedDownloader;
pub use cached_file::CachedFile;
pub use config::Config;
pub use error::{Error, Result};
pub use file_cache::{FileCache, FileCacheEntry};
pub use persist::STATE_FILE;

pub use depot_archive::{Transformer, noop_transform, tar_transform};
pub use depot_fetch::{CachingInfo, DownloadCancelled, HttpClient, HttpResponse};
pub use depot_verify::Checksum;
