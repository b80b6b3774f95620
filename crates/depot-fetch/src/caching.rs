use serde::{Deserialize, Serialize};

/// Version metadata a server attached to a response.
///
/// Stored with every cache entry and replayed as `If-None-Match` /
/// `If-Modified-Since` on the next request for the same key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CachingInfo {
    #[serde(rename = "ETag", default)]
    pub etag:          String,
    #[serde(default)]
    pub last_modified: String,
}

impl CachingInfo {
    pub fn new(etag: impl Into<String>, last_modified: impl Into<String>) -> Self {
        Self {
            etag:          etag.into(),
            last_modified: last_modified.into(),
        }
    }

    /// Content without either validator cannot be revalidated later, so it
    /// must not be shared through the cache.
    pub fn is_cacheable(&self) -> bool { !self.etag.is_empty() || !self.last_modified.is_empty() }

    /// Request headers for a conditional GET.
    pub fn conditional_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(2);
        if !self.etag.is_empty() {
            headers.push(("If-None-Match".to_string(), self.etag.clone()));
        }
        if !self.last_modified.is_empty() {
            headers.push(("If-Modified-Since".to_string(), self.last_modified.clone()));
        }
        headers
    }
}
