use std::fs;
use std::path::{Path, PathBuf};

use depot_archive::{Transformer, noop_transform, tar_transform};
use depot_fetch::{CachingInfo, Downloader, HttpClient};
use depot_verify::Checksum;
use md5::{Digest, Md5};
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::cached_file::CachedFile;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_cache::FileCache;
use crate::gate::KeyGates;
use crate::persist::STATE_FILE;

/// A transformed download waiting to be handed to the cache.
struct Download {
    path:         TempPath,
    size:         u64,
    caching_info: CachingInfo,
    /// Bytes received from the server, before any transform.
    received:     u64,
}

/// Downloads through a shared [`FileCache`], with at most one fetch per
/// cache key in flight.
///
/// Cache keys are opaque strings; an empty key opts out of caching.
pub struct CachedDownloader<C: HttpClient> {
    downloader:    Downloader<C>,
    cache:         FileCache,
    uncached_path: PathBuf,
    transformer:   Box<dyn Transformer>,
    gates:         KeyGates,
    state_path:    PathBuf,
}

#[cfg(feature = "reqwest")]
impl CachedDownloader<depot_fetch::ReqwestClient> {
    /// Build a downloader using `reqwest` with the transport settings in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = depot_fetch::ReqwestClient::with_options(&config.downloader_options())?;
        Self::new(config, client)
    }
}

impl<C: HttpClient> CachedDownloader<C> {
    /// Create the cache directories if missing. Existing content is left
    /// alone until [`recover_state`](Self::recover_state) runs.
    pub fn new(config: &Config, client: C) -> Result<Self> {
        create_cache_dir(&config.cached_path)?;
        fs::create_dir_all(&config.uncached_path)?;

        Ok(Self {
            downloader: Downloader::new(client, &config.downloader_options()),
            cache: FileCache::new(&config.cached_path, config.max_size_bytes),
            uncached_path: config.uncached_path.clone(),
            transformer: Box::new(noop_transform),
            gates: KeyGates::default(),
            state_path: config.cached_path.join(STATE_FILE),
        })
    }

    /// Transform applied to [`fetch`](Self::fetch) results before caching.
    pub fn with_transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Box::new(transformer);
        self
    }

    pub fn cache(&self) -> &FileCache { &self.cache }

    pub fn client(&self) -> &C { self.downloader.client() }

    /// Fetch `url` as a readable file, reusing the cached copy when the
    /// server confirms it is current.
    ///
    /// Returns the file and the number of bytes downloaded, which is zero
    /// when the cache was warm.
    pub async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: &Checksum,
        cancel: &CancellationToken,
    ) -> Result<(CachedFile, u64)> {
        if cache_key.is_empty() {
            return self.fetch_uncached(url, checksum, cancel).await;
        }

        let key = hash_key(cache_key);
        let _gate = self.gates.acquire(&key, cancel).await?;

        // Dropping `current` on any return below releases the stale reference.
        let (current, caching_info, lookup) = match self.cache.get(&key) {
            Ok((file, info)) => (Some(file), info, None),
            Err(e) => (None, CachingInfo::default(), Some(e)),
        };

        let transformer = self.transformer.as_ref();
        let Some(download) = self
            .populate_cache(url, &key, &caching_info, checksum, transformer, cancel)
            .await?
        else {
            debug!(cache_key = %key, "cache is warm");
            return match current {
                Some(file) => Ok((file, 0)),
                None => Err(lookup.unwrap_or(Error::EntryNotFound)),
            };
        };
        drop(current);

        if download.caching_info.is_cacheable() {
            let file = self
                .cache
                .add(&key, &download.path, download.size, download.caching_info)?;
            Ok((file, download.received))
        } else {
            debug!(cache_key = %key, "response is not cacheable");
            self.cache.remove(&key);
            Ok((CachedFile::remove_on_close(download.path)?, download.received))
        }
    }

    /// Fetch `url` as an archive and return its expanded directory.
    ///
    /// The directory stays valid until released with
    /// [`close_directory`](Self::close_directory). Requires a cache key and a
    /// response carrying `ETag` or `Last-Modified`; otherwise fails with
    /// [`Error::NotCacheable`].
    pub async fn fetch_as_directory(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: &Checksum,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, u64)> {
        if cache_key.is_empty() {
            return Err(Error::NotCacheable);
        }

        let key = hash_key(cache_key);
        let _gate = self.gates.acquire(&key, cancel).await?;

        // Dropping `current` on any return, or with this future, releases the
        // stale directory.
        let (current, caching_info, lookup) = match self.cache.get_directory(&key) {
            Ok((dir, info)) => (Some(DirectoryLease::new(&self.cache, &key, dir)), info, None),
            Err(e) => (None, CachingInfo::default(), Some(e)),
        };

        let transformer = &tar_transform;
        let Some(download) = self
            .populate_cache(url, &key, &caching_info, checksum, transformer, cancel)
            .await?
        else {
            debug!(cache_key = %key, "cache is warm");
            return match current {
                Some(lease) => Ok((lease.keep(), 0)),
                None => Err(lookup.unwrap_or(Error::EntryNotFound)),
            };
        };
        drop(current);

        if !download.caching_info.is_cacheable() {
            debug!(cache_key = %key, "response is not cacheable");
            self.cache.remove(&key);
            return Err(Error::NotCacheable);
        }

        let dir = self
            .cache
            .add_directory(&key, &download.path, download.size, download.caching_info)?;
        Ok((dir, download.received))
    }

    /// Release a directory returned by [`fetch_as_directory`](Self::fetch_as_directory).
    pub fn close_directory(&self, cache_key: &str, dir: &Path) -> Result<()> {
        self.cache.close_directory(&hash_key(cache_key), dir)
    }

    /// Persist the cache table next to the cached files.
    pub fn save_state(&self) -> Result<()> { self.cache.save_state(&self.state_path) }

    /// Reload the table written by [`save_state`](Self::save_state), deleting
    /// anything in the cache directory it does not mention.
    pub fn recover_state(&self) -> Result<()> { self.cache.recover_state(&self.state_path) }

    /// Evict down to the configured budget.
    pub fn prune(&self) { self.cache.prune() }

    async fn fetch_uncached(
        &self,
        url: &Url,
        checksum: &Checksum,
        cancel: &CancellationToken,
    ) -> Result<(CachedFile, u64)> {
        let transformer = self.transformer.as_ref();
        let download = self
            .populate_cache(url, "uncached", &CachingInfo::default(), checksum, transformer, cancel)
            .await?
            .ok_or(Error::EntryNotFound)?;
        Ok((CachedFile::remove_on_close(download.path)?, download.received))
    }

    /// Download into the uncached directory and run `transformer`. `None`
    /// means the server reported the content unchanged.
    async fn populate_cache(
        &self,
        url: &Url,
        name: &str,
        caching_info: &CachingInfo,
        checksum: &Checksum,
        transformer: &dyn Transformer,
        cancel: &CancellationToken,
    ) -> Result<Option<Download>> {
        let prefix = format!("{name}-");
        let create_destination = || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .tempfile_in(&self.uncached_path)
        };

        let Some(downloaded) = self
            .downloader
            .download(url, create_destination, caching_info, checksum, cancel)
            .await?
        else {
            return Ok(None);
        };

        let transformed = tempfile::Builder::new()
            .prefix("transformed")
            .tempfile_in(&self.uncached_path)?
            .into_temp_path();
        let size = transformer.transform(&downloaded.path, &transformed)?;

        Ok(Some(Download {
            path: transformed,
            size,
            caching_info: downloaded.caching_info,
            received: downloaded.bytes,
        }))
    }
}

/// A directory reference taken from the cache, closed on drop unless kept.
struct DirectoryLease<'a> {
    cache: &'a FileCache,
    key:   &'a str,
    dir:   Option<PathBuf>,
}

impl<'a> DirectoryLease<'a> {
    fn new(cache: &'a FileCache, key: &'a str, dir: PathBuf) -> Self {
        Self {
            cache,
            key,
            dir: Some(dir),
        }
    }

    /// Hand the reference to the caller.
    fn keep(mut self) -> PathBuf { self.dir.take().unwrap_or_default() }
}

impl Drop for DirectoryLease<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = self.cache.close_directory(self.key, &dir)
        {
            warn!(cache_key = %self.key, path = ?dir, error = %e, "failed to release stale directory");
        }
    }
}

/// Fixed-width, filesystem-safe form of a caller's cache key.
fn hash_key(cache_key: &str) -> String { hex::encode(Md5::digest(cache_key.as_bytes())) }

fn create_cache_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o770);
    }
    builder.create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_keys_are_stable_hex() {
        let key = hash_key("droplet-guid");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, hash_key("droplet-guid"));
        assert_ne!(key, hash_key("droplet-guid2"));
        assert_eq!(hash_key(""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
