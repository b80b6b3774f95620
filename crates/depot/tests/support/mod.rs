#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use depot::{CachedDownloader, Config, HttpClient, HttpResponse};
use futures_util::StreamExt;
use md5::{Digest, Md5};
use url::Url;

#[derive(Clone, Default)]
pub struct Resource {
    pub body:          Vec<u8>,
    pub etag:          Option<String>,
    pub last_modified: Option<String>,
    /// Send the first half of the body, then never finish.
    pub stall:         bool,
    /// Answer every request with this status and no body.
    pub failing:       Option<u16>,
}

impl Resource {
    pub fn new(body: impl Into<Vec<u8>>, etag: &str) -> Self {
        Self {
            body: body.into(),
            etag: Some(etag.to_string()),
            ..Default::default()
        }
    }

    pub fn uncacheable(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            failing: Some(status),
            ..Default::default()
        }
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }
}

#[derive(Default)]
struct Inner {
    resources: Mutex<HashMap<String, Resource>>,
    headers:   Mutex<Vec<(String, Vec<(String, String)>)>>,
    requests:  AtomicUsize,
    in_flight: AtomicUsize,
    peak:      AtomicUsize,
    delay:     Mutex<Duration>,
}

/// In-process stand-in for a file server that honors `If-None-Match`.
#[derive(Clone, Default)]
pub struct FakeServer {
    inner: Arc<Inner>,
}

impl FakeServer {
    pub fn new() -> Self { Self::default() }

    pub fn serve(&self, path: &str, resource: Resource) {
        self.inner.resources.lock().unwrap().insert(path.to_string(), resource);
    }

    pub fn set_delay(&self, delay: Duration) { *self.inner.delay.lock().unwrap() = delay; }

    pub fn url(&self, path: &str) -> Url { Url::parse("http://depot.test").unwrap().join(path).unwrap() }

    pub fn requests(&self) -> usize { self.inner.requests.load(Ordering::SeqCst) }

    /// Most requests that were being answered at the same time.
    pub fn peak_in_flight(&self) -> usize { self.inner.peak.load(Ordering::SeqCst) }

    pub fn headers_of(&self, request: usize) -> Vec<(String, String)> {
        self.inner.headers.lock().unwrap()[request].1.clone()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        while self.requests() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

impl HttpClient for FakeServer {
    type Error = io::Error;

    async fn get(&self, url: &Url, headers: &[(String, String)]) -> io::Result<HttpResponse<io::Error>> {
        let inner = &self.inner;
        inner.requests.fetch_add(1, Ordering::SeqCst);
        inner
            .headers
            .lock()
            .unwrap()
            .push((url.path().to_string(), headers.to_vec()));

        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&inner.in_flight);

        let delay = *inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let resource = inner.resources.lock().unwrap().get(url.path()).cloned();
        let Some(resource) = resource else {
            return Ok(response(404, None, None, Vec::new(), false));
        };

        if let Some(status) = resource.failing {
            return Ok(response(status, None, None, Vec::new(), false));
        }

        let if_none_match = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("If-None-Match"))
            .map(|(_, value)| value.as_str());
        if resource.etag.is_some() && if_none_match == resource.etag.as_deref() {
            return Ok(response(304, resource.etag, resource.last_modified, Vec::new(), false));
        }

        Ok(response(
            200,
            resource.etag,
            resource.last_modified,
            resource.body,
            resource.stall,
        ))
    }
}

fn response(
    status: u16,
    etag: Option<String>,
    last_modified: Option<String>,
    body: Vec<u8>,
    stall: bool,
) -> HttpResponse<io::Error> {
    let (head, tail) = body.split_at(body.len() / 2);
    let head = Bytes::copy_from_slice(head);
    let tail = Bytes::copy_from_slice(tail);

    let body = if stall {
        futures_util::stream::iter([Ok::<_, io::Error>(head)])
            .chain(futures_util::stream::pending())
            .boxed()
    } else {
        futures_util::stream::iter([Ok::<_, io::Error>(head), Ok(tail)]).boxed()
    };

    HttpResponse {
        status,
        etag,
        last_modified,
        body,
    }
}

pub struct Harness {
    pub scratch:    tempfile::TempDir,
    pub config:     Config,
    pub server:     FakeServer,
    pub downloader: CachedDownloader<FakeServer>,
}

impl Harness {
    pub fn new(max_size: u64) -> Self { Self::with_config(|config| config.max_size_bytes(max_size)) }

    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let config = configure(
            Config::new()
                .cached_path(scratch.path().join("cached"))
                .uncached_path(scratch.path().join("uncached"))
                .retry_backoff(Duration::from_millis(1)),
        );
        let server = FakeServer::new();
        let downloader = CachedDownloader::new(&config, server.clone()).unwrap();
        Self {
            scratch,
            config,
            server,
            downloader,
        }
    }

    /// A second downloader over the same directories, as after a restart.
    pub fn restart(&self, configure: impl FnOnce(Config) -> Config) -> CachedDownloader<FakeServer> {
        CachedDownloader::new(&configure(self.config.clone()), self.server.clone()).unwrap()
    }

    pub fn cached_files(&self) -> Vec<PathBuf> { list(&self.config.cached_path) }

    pub fn uncached_files(&self) -> Vec<PathBuf> { list(&self.config.uncached_path) }
}

/// The key the cache files an entry under for a caller's `cache_key`.
pub fn cache_key(cache_key: &str) -> String { hex::encode(Md5::digest(cache_key.as_bytes())) }

/// References held on the live entry for `cache_key`, counting the cache's own.
pub fn in_use(downloader: &CachedDownloader<FakeServer>, key: &str) -> Option<u32> {
    downloader.cache().entry(&cache_key(key)).map(|entry| entry.in_use())
}

pub fn list(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    entries
}

pub fn read_all(mut reader: impl Read) -> String {
    let mut body = String::new();
    reader.read_to_string(&mut body).unwrap();
    body
}

/// A gzipped tar holding `files`.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn write_file(path: &Path, body: &[u8]) {
    File::create(path).unwrap().write_all(body).unwrap();
}
