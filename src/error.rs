use thiserror::Error;

/// Structured error context attached to every failure that can reach a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// HTTP status code of the last observed response, if any.
    pub status_code: Option<u16>,
    /// Dispatcher-assigned request id (also sent as `x-voicegate-request-id`).
    pub request_id: Option<String>,
    /// Number of retries performed before the error became terminal.
    pub retry_count: Option<u32>,
    /// Whether the failure originated in the cache subsystem.
    pub cache_related: bool,
    /// Configuration key or request field that caused the error (e.g., "rate_limit.requests")
    pub field_path: Option<String>,
    /// Additional context about the error
    pub details: Option<String>,
    /// Source of the error (e.g., "transport", "disk_store")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn with_cache_related(mut self, cache_related: bool) -> Self {
        self.cache_related = cache_related;
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fill fields that are unset here from `other`.
    fn merge(mut self, other: ErrorContext) -> Self {
        self.status_code = self.status_code.or(other.status_code);
        self.request_id = self.request_id.or(other.request_id);
        self.retry_count = self.retry_count.or(other.retry_count);
        self.cache_related = self.cache_related || other.cache_related;
        self.field_path = self.field_path.or(other.field_path);
        self.details = self.details.or(other.details);
        self.source = self.source.or(other.source);
        self
    }
}

/// Unified error type for the request layer.
///
/// Variants map one-to-one onto the failure taxonomy the dispatcher
/// classifies against; see [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {message}{}", format_context(.context))]
    Network {
        message: String,
        context: ErrorContext,
    },

    #[error("Timeout: {message}{}", format_context(.context))]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    #[error("Server error: HTTP {status}: {message}{}", format_context(.context))]
    HttpServer {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limited: HTTP {status}: {message}{}", format_context(.context))]
    RateLimited {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("Client error: HTTP {status}: {message}{}", format_context(.context))]
    HttpClient {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Cache I/O error: {message}{}", format_context(.context))]
    CacheIo {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Dispatcher shut down while request was pending{}", format_context(.context))]
    Shutdown { context: ErrorContext },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref id) = ctx.request_id {
        parts.push(format!("request_id: {}", id));
    }
    if let Some(retries) = ctx.retry_count {
        parts.push(format!("retries: {}", retries));
    }
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn cache_io(msg: impl Into<String>) -> Self {
        Error::CacheIo {
            message: msg.into(),
            context: ErrorContext::new().with_cache_related(true),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn shutdown() -> Self {
        Error::Shutdown {
            context: ErrorContext::new(),
        }
    }

    /// Whether the dispatcher may reissue the request after this error.
    ///
    /// Network failures, timeouts, 5xx and 429 are retryable. Everything else,
    /// including the remaining 4xx statuses, is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. }
                | Error::Timeout { .. }
                | Error::HttpServer { .. }
                | Error::RateLimited { .. }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::HttpServer { status, .. }
            | Error::RateLimited { status, .. }
            | Error::HttpClient { status, .. } => Some(*status),
            other => other.context().and_then(|c| c.status_code),
        }
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.context().and_then(|c| c.retry_count)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }

    pub fn is_cache_related(&self) -> bool {
        matches!(self, Error::CacheIo { .. })
            || self.context().map(|c| c.cache_related).unwrap_or(false)
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::HttpServer { context, .. }
            | Error::RateLimited { context, .. }
            | Error::HttpClient { context, .. }
            | Error::CacheIo { context, .. }
            | Error::Configuration { context, .. }
            | Error::Shutdown { context } => Some(context),
            Error::Serialization(_) => None,
        }
    }

    /// Attach context; fields already set on `ctx` win over existing ones.
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        match &mut self {
            Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::HttpServer { context, .. }
            | Error::RateLimited { context, .. }
            | Error::HttpClient { context, .. }
            | Error::CacheIo { context, .. }
            | Error::Configuration { context, .. }
            | Error::Shutdown { context } => {
                let existing = std::mem::take(context);
                *context = ctx.merge(existing);
            }
            Error::Serialization(_) => {}
        }
        self
    }

    /// Short, stable label used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network { .. } => "network",
            Error::Timeout { .. } => "timeout",
            Error::HttpServer { .. } => "http_server",
            Error::RateLimited { .. } => "rate_limited",
            Error::HttpClient { .. } => "http_client",
            Error::CacheIo { .. } => "cache_io",
            Error::Configuration { .. } => "configuration",
            Error::Shutdown { .. } => "shutdown",
            Error::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        assert!(Error::network("connection reset").is_retryable());
        assert!(Error::timeout("no response within 100ms").is_retryable());
        assert!(Error::HttpServer {
            status: 503,
            message: String::new(),
            context: ErrorContext::new(),
        }
        .is_retryable());
        assert!(Error::RateLimited {
            status: 429,
            message: String::new(),
            retry_after_ms: None,
            context: ErrorContext::new(),
        }
        .is_retryable());
        assert!(!Error::HttpClient {
            status: 404,
            message: String::new(),
            context: ErrorContext::new(),
        }
        .is_retryable());
        assert!(!Error::cache_io("disk full").is_retryable());
        assert!(!Error::configuration("bad").is_retryable());
    }

    #[test]
    fn test_with_context_keeps_existing_fields() {
        let err = Error::network("boom")
            .with_context(ErrorContext::new().with_request_id("abc"))
            .with_context(ErrorContext::new().with_retry_count(3));
        assert_eq!(err.request_id(), Some("abc"));
        assert_eq!(err.retry_count(), Some(3));
        let rendered = err.to_string();
        assert!(rendered.contains("request_id: abc"));
        assert!(rendered.contains("retries: 3"));
    }

    #[test]
    fn test_status_code_and_cache_flag() {
        let err = Error::HttpClient {
            status: 401,
            message: "unauthorized".into(),
            context: ErrorContext::new(),
        };
        assert_eq!(err.status_code(), Some(401));
        assert!(!err.is_cache_related());
        assert!(Error::cache_io("corrupt manifest").is_cache_related());
    }
}
