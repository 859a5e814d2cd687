use crate::config::DispatcherConfig;
use crate::resilience::classify::{classify_transport, timeout_error};
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) const REQUEST_ID_HEADER: &str = "x-voicegate-request-id";

/// A fully resolved outbound request. Reissued unchanged on every retry.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub method: Method,
    pub url: url::Url,
    pub query: BTreeMap<String, String>,
    pub json: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

/// Buffered response from a single attempt.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Pooled HTTPS transport.
///
/// - Keep-alive connections are reused up to `max_concurrent` per host.
/// - At most `max_concurrent` attempts are in flight; the rest queue on
///   [`HttpTransport::acquire`].
/// - The credential header is attached to every request.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    base: Option<url::Url>,
    credential: Option<(HeaderName, HeaderValue)>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl HttpTransport {
    pub fn new(config: &DispatcherConfig) -> Result<Self> {
        let credential = match &config.api_key {
            Some(key) => {
                let name = HeaderName::from_bytes(config.api_key_header.trim().as_bytes())
                    .map_err(|e| {
                        Error::configuration_with_context(
                            format!("invalid credential header name: {}", e),
                            ErrorContext::new().with_field_path("apiKeyHeader"),
                        )
                    })?;
                let mut value = HeaderValue::from_str(key).map_err(|_| {
                    Error::configuration_with_context(
                        "API key contains characters not allowed in a header",
                        ErrorContext::new().with_field_path("apiKey"),
                    )
                })?;
                value.set_sensitive(true);
                Some((name, value))
            }
            None => None,
        };

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.timeout())
            .pool_max_idle_per_host(config.max_concurrent)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Conservative HTTP/2 keepalive defaults for long-lived connections.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base: url::Url::parse(&base_url).ok(),
            base_url,
            credential,
            timeout: config.timeout(),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    /// Resolve `path` against the base URL. Absolute `http(s)://` URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<url::Url> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        url::Url::parse(&joined).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid request URL: {}", e),
                ErrorContext::new()
                    .with_details(joined)
                    .with_source("transport"),
            )
        })
    }

    /// Path of `url` below the base URL's path, e.g. `/voices` for
    /// `https://host/api/v1/voices` with base `https://host/api/v1`.
    /// URLs on another origin or outside the base path keep their full path.
    pub fn endpoint_path(&self, url: &url::Url) -> String {
        let full = url.path();
        let base = match &self.base {
            Some(base) if base.origin() == url.origin() => base,
            _ => return full.to_string(),
        };
        match full.strip_prefix(base.path().trim_end_matches('/')) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => full.to_string(),
        }
    }

    /// Wait for a free pool slot. Fails with [`Error::Shutdown`] once the pool is closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::shutdown().with_context(ErrorContext::new().with_source("pool")))
    }

    /// Refuse new pool slots; queued and future acquirers get [`Error::Shutdown`].
    pub fn close(&self) {
        self.permits.close();
    }

    fn build(&self, req: &Outgoing, request_id: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(req.method.clone(), req.url.clone());
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.json {
            builder = builder.json(body);
        }
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some((name, value)) = &self.credential {
            builder = builder.header(name.clone(), value.clone());
        }
        builder.header(REQUEST_ID_HEADER, request_id)
    }

    /// Send and return once headers arrive; the body is left for the caller to stream.
    pub async fn send(&self, req: &Outgoing, request_id: &str) -> Result<reqwest::Response> {
        let fut = self.build(req, request_id).send();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(classify_transport(&e, self.timeout)),
            Err(_) => Err(timeout_error(self.timeout)),
        }
    }

    /// Send and buffer the whole body; the timeout covers both.
    pub async fn execute(&self, req: &Outgoing, request_id: &str) -> Result<RawResponse> {
        let timeout = self.timeout;
        let attempt = async {
            let resp = self
                .build(req, request_id)
                .send()
                .await
                .map_err(|e| classify_transport(&e, timeout))?;
            let status = resp.status().as_u16();
            let headers = resp.headers().clone();
            let body = resp
                .bytes()
                .await
                .map_err(|e| classify_transport(&e, timeout))?;
            Ok::<_, Error>(RawResponse {
                status,
                headers,
                body,
            })
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(timeout)),
        }
    }
}
