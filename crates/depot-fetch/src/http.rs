use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use url::Url;

/// A boxed stream type for HTTP response bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Status line, validators, and streaming body of a GET response.
pub struct HttpResponse<E> {
    pub status:        u16,
    pub etag:          Option<String>,
    pub last_modified: Option<String>,
    pub body:          BoxStream<'static, std::result::Result<Bytes, E>>,
}

/// Asynchronous HTTP client abstraction.
///
/// Implementations follow redirects and apply their own request timeouts.
/// Non-success statuses are returned as responses, not errors: the
/// [`Downloader`](crate::Downloader) needs to see `304 Not Modified`.
///
/// # Implementations
///
/// - [`ReqwestClient`]: Production implementation using `reqwest`
/// - Scripted implementations for testing
pub trait HttpClient: Send + Sync {
    /// Error type for HTTP operations.
    type Error: std::error::Error + Send + 'static;

    /// Send a GET with the given extra headers.
    fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> impl Future<Output = std::result::Result<HttpResponse<Self::Error>, Self::Error>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use std::fs;

    use futures_util::StreamExt;

    use super::*;
    use crate::error::{FetchError, Result};
    use crate::options::DownloaderOptions;

    /// Production HTTP client implementation using reqwest.
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Create a new ReqwestClient with default configuration.
        pub fn new() -> Result<Self> { Self::with_options(&DownloaderOptions::default()) }

        /// Apply timeouts and TLS settings. Proxies are taken from the environment.
        pub fn with_options(options: &DownloaderOptions) -> Result<Self> {
            let mut builder = reqwest::Client::builder()
                .timeout(options.timeout)
                .connect_timeout(options.connect_timeout)
                .danger_accept_invalid_certs(options.skip_ssl_verification);

            for path in &options.ca_cert_files {
                let pem = fs::read(path)?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| FetchError::Network(format!("{}: {e}", path.display())))?;
                builder = builder.add_root_certificate(cert);
            }

            let client = builder.build().map_err(|e| FetchError::Network(e.to_string()))?;
            Ok(Self { client })
        }
    }

    fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    impl HttpClient for ReqwestClient {
        type Error = reqwest::Error;

        async fn get(
            &self,
            url: &Url,
            headers: &[(String, String)],
        ) -> std::result::Result<HttpResponse<Self::Error>, Self::Error> {
            let mut request = self.client.get(url.as_str());

            for (key, value) in headers {
                request = request.header(key.as_str(), value.as_str());
            }

            let response = request.send().await?;
            let etag = header_value(&response, reqwest::header::ETAG);
            let last_modified = header_value(&response, reqwest::header::LAST_MODIFIED);

            Ok(HttpResponse {
                status: response.status().as_u16(),
                etag,
                last_modified,
                body: response.bytes_stream().boxed(),
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestClient;
