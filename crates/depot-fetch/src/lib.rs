//! Conditional HTTP downloading with streaming verification.
//!
//! # Architecture
//!
//! - [`CachingInfo`] - ETag / Last-Modified metadata used for conditional GETs
//! - [`HttpClient`] - transport seam, with [`ReqwestClient`] for production
//! - [`Downloader`] - bounded, retrying, cancellable download into a caller-chosen temp file
//!
//! # Key Features
//!
//! - **Single-Pass**: the body is hashed while it is streamed to disk
//! - **No Partial Files**: destinations are `tempfile` handles, removed on any failure
//! - **Cancellable**: every wait point observes a [`CancellationToken`](tokio_util::sync::CancellationToken)

mod caching;
mod downloader;
mod error;
mod http;
mod options;

pub use caching::CachingInfo;
pub use downloader::{Downloaded, Downloader, MAX_DOWNLOAD_ATTEMPTS};
pub use error::{DownloadCancelled, FetchError, Result};
pub use http::{BoxStream, HttpClient, HttpResponse};
pub use options::DownloaderOptions;

#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
