use crate::Result;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;

/// Boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// A buffered response, either from the network or from cache.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Empty for cache hits; only the body is cached.
    pub headers: HeaderMap,
    pub body: Bytes,
    pub from_cache: bool,
    pub retry_count: u32,
    pub request_id: String,
    pub duration: Duration,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }
}

/// A streamed response. Holds its connection-pool slot until dropped.
pub struct StreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub retry_count: u32,
    pub request_id: String,
    stream: ByteStream,
    _permit: OwnedSemaphorePermit,
}

impl StreamResponse {
    pub(crate) fn new(
        status: u16,
        headers: HeaderMap,
        retry_count: u32,
        request_id: String,
        stream: ByteStream,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            status,
            headers,
            retry_count,
            request_id,
            stream,
            _permit: permit,
        }
    }

    /// Detach the body; the pool slot moves with it.
    pub fn into_stream(self) -> ByteStream {
        Box::pin(PermitStream {
            inner: self.stream,
            _permit: self._permit,
        })
    }

    /// Drain the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        use futures::TryStreamExt;
        let chunks: Vec<Bytes> = self.into_stream().try_collect().await?;
        Ok(Bytes::from(chunks.concat()))
    }
}

impl Stream for StreamResponse {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

struct PermitStream {
    inner: ByteStream,
    _permit: OwnedSemaphorePermit,
}

impl Stream for PermitStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
