//! Response types.
//!
//! [`ConnectResponse`] pairs a message (or a [`Streaming`] of messages) with
//! the response headers. Unary-style calls also carry their trailers.

mod decoder;
mod streaming;

use http::HeaderMap;
use std::ops::Deref;

pub use decoder::FrameDecoder;
pub use streaming::Streaming;

/// A response message with its metadata.
///
/// # Example
///
/// ```ignore
/// let response = client.call_unary::<Req, Res>("pkg.Service/Method", &req).await?;
///
/// if let Some(value) = response.metadata().get("x-custom-header") {
///     println!("Custom header: {value}");
/// }
/// let message = response.into_inner();
/// ```
#[derive(Debug, Clone)]
pub struct ConnectResponse<T> {
    inner: T,
    metadata: Metadata,
    trailers: Metadata,
}

impl<T> ConnectResponse<T> {
    pub fn new(inner: T, metadata: Metadata) -> Self {
        Self {
            inner,
            metadata,
            trailers: Metadata::empty(),
        }
    }

    pub fn with_trailers(mut self, trailers: Metadata) -> Self {
        self.trailers = trailers;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Response headers.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Trailing metadata. Empty for streaming responses, whose trailers
    /// arrive through [`Streaming::trailers`].
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    /// Transform the inner value, preserving metadata.
    pub fn map<U, F>(self, f: F) -> ConnectResponse<U>
    where
        F: FnOnce(T) -> U,
    {
        ConnectResponse {
            inner: f(self.inner),
            metadata: self.metadata,
            trailers: self.trailers,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_parts(self) -> (T, Metadata, Metadata) {
        (self.inner, self.metadata, self.trailers)
    }
}

impl<T> Deref for ConnectResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> AsRef<T> for ConnectResponse<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

/// Read access to response headers or trailers.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A header value, or `None` if missing or not visible ASCII.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(|v| v.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}
