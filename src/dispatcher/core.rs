use super::context::{RequestContext, RequestState};
use super::options::RequestOptions;
use super::response::{ByteStream, Response, StreamResponse};
use super::ttl::TtlPolicy;
use crate::cache::{CacheEngine, CacheKeyGenerator, SetOptions};
use crate::config::DispatcherConfig;
use crate::events::{DispatchEvent, EventBus};
use crate::metrics::{Counter, Metrics, MetricsSnapshot};
use crate::resilience::classify::{classify_status, classify_transport};
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::{Decision, RetryPolicy};
use crate::transport::{HttpTransport, Outgoing, RawResponse};
use crate::{Error, ErrorContext, Result};
use futures::TryStreamExt;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resilient request dispatcher.
///
/// Owns exactly one [`CacheEngine`]. Every call goes through:
/// cache lookup (cacheable GETs) -> rate-limit admission -> pooled
/// connection -> classification -> bounded retry with backoff ->
/// write-through.
///
/// Share across tasks with `Arc<Dispatcher>`.
pub struct Dispatcher {
    transport: HttpTransport,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cache: CacheEngine,
    keys: CacheKeyGenerator,
    ttl: TtlPolicy,
    events: EventBus,
    metrics: Metrics,
    cancel: CancellationToken,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Validate `config` and build the dispatcher with a fresh event bus.
    pub async fn new(config: DispatcherConfig) -> Result<Self> {
        Self::with_events(config, EventBus::new()).await
    }

    /// Like [`new`](Self::new), publishing to an existing bus.
    pub async fn with_events(config: DispatcherConfig, events: EventBus) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        let cache = CacheEngine::open(config.cache.clone(), events.clone()).await?;
        info!(
            base_url = %config.base_url,
            max_concurrent = config.max_concurrent,
            rate_limit = config.rate_limit.requests,
            window_ms = config.rate_limit.window_ms,
            cache_enabled = cache.is_enabled(),
            cache_persistent = cache.is_persistent(),
            "dispatcher ready"
        );
        Ok(Self {
            transport,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            ttl: TtlPolicy::with_defaults(config.cache.ttl()),
            keys: CacheKeyGenerator::new(),
            cache,
            events,
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
            config,
        })
    }

    /// Replace the endpoint TTL rules used for write-through.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl = policy;
        self
    }

    /// Replace the backoff policy (e.g. a jitter-free one).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheEngine {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats())
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, RequestOptions::new()).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        self.request(Method::POST, path, RequestOptions::new().json(body)?)
            .await
    }

    /// Issue a request and buffer the response body.
    ///
    /// Returns the last observed error, annotated with request id and retry
    /// count, once the retry budget is spent or a fatal error occurs.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<Response> {
        if self.is_shut_down() {
            return Err(Error::shutdown());
        }
        let url = self.transport.resolve(path)?;
        let cacheable = opts.is_cacheable(&method) && self.cache.is_enabled();
        let mut ctx = self.start(method.clone(), &url, cacheable);

        let key = cacheable.then(|| {
            self.keys
                .generate(method.as_str(), url.as_str(), &opts.query, opts.json.as_ref())
        });
        if let Some(key) = &key {
            ctx.advance(RequestState::CacheCheck);
            if let Some(body) = self.cache.get(key.as_str()).await {
                ctx.advance(RequestState::CacheHit);
                self.metrics.incr(Counter::CacheHits);
                let resp = Response {
                    status: 200,
                    headers: HeaderMap::new(),
                    body,
                    from_cache: true,
                    retry_count: 0,
                    request_id: ctx.id.clone(),
                    duration: ctx.elapsed(),
                };
                self.complete(&mut ctx, &resp);
                return Ok(resp);
            }
            ctx.advance(RequestState::CacheMiss);
            self.metrics.incr(Counter::CacheMisses);
        }

        let ttl_path = self.transport.endpoint_path(&url);
        let outgoing = Outgoing {
            method,
            url,
            query: opts.query.clone(),
            json: opts.json.clone(),
            headers: opts.headers.clone(),
        };

        if let Err(e) = self.admit(&mut ctx).await {
            return Err(self.fail(&mut ctx, e));
        }

        let transport = &self.transport;
        let out = &outgoing;
        let result = self
            .run(&mut ctx, move |request_id| async move {
                let _permit = transport.acquire().await?;
                let raw = transport.execute(out, &request_id).await?;
                match classify_status(raw.status, &raw.headers, &raw.body) {
                    Some(err) => Err(err),
                    None => Ok::<_, Error>(raw),
                }
            })
            .await;

        let raw: RawResponse = match result {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail(&mut ctx, e)),
        };

        if let Some(key) = &key {
            if raw.status == 200 {
                ctx.advance(RequestState::CacheWrite);
                let ttl = opts.ttl.unwrap_or_else(|| self.ttl.ttl_for(&ttl_path));
                self.cache.set(
                    key.as_str(),
                    raw.body.clone(),
                    SetOptions::new()
                        .with_ttl(ttl)
                        .persistent(opts.persist.unwrap_or_else(|| self.cache.is_persistent()))
                        .with_priority(opts.priority),
                );
            }
        }

        let resp = Response {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            from_cache: false,
            retry_count: ctx.retry_count,
            request_id: ctx.id.clone(),
            duration: ctx.elapsed(),
        };
        self.complete(&mut ctx, &resp);
        Ok(resp)
    }

    /// Issue a request and stream the body.
    ///
    /// Admission, pooling and retries apply until response headers arrive.
    /// The body is never cached, and the pool slot is held until the returned
    /// stream is dropped.
    pub async fn request_stream(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<StreamResponse> {
        if self.is_shut_down() {
            return Err(Error::shutdown());
        }
        let url = self.transport.resolve(path)?;
        let mut ctx = self.start(method.clone(), &url, false);
        let outgoing = Outgoing {
            method,
            url,
            query: opts.query,
            json: opts.json,
            headers: opts.headers,
        };

        if let Err(e) = self.admit(&mut ctx).await {
            return Err(self.fail(&mut ctx, e));
        }

        let transport = &self.transport;
        let out = &outgoing;
        let result = self
            .run(&mut ctx, move |request_id| async move {
                let permit = transport.acquire().await?;
                let timeout = transport.timeout();
                let resp = transport.send(out, &request_id).await?;
                let status = resp.status().as_u16();
                let headers = resp.headers().clone();
                if !(200..300).contains(&status) {
                    let body = tokio::time::timeout(timeout, resp.bytes())
                        .await
                        .ok()
                        .and_then(|r| r.ok())
                        .unwrap_or_default();
                    return Err(classify_status(status, &headers, &body).unwrap_or_else(|| {
                        Error::HttpClient {
                            status,
                            message: String::new(),
                            context: ErrorContext::new().with_status_code(status),
                        }
                    }));
                }
                let stream: ByteStream = Box::pin(
                    resp.bytes_stream()
                        .map_err(move |e| classify_transport(&e, timeout)),
                );
                Ok::<_, Error>((status, headers, stream, permit))
            })
            .await;

        match result {
            Ok((status, headers, stream, permit)) => {
                let resp = StreamResponse::new(
                    status,
                    headers,
                    ctx.retry_count,
                    ctx.id.clone(),
                    stream,
                    permit,
                );
                self.metrics.incr(Counter::Responses);
                self.events.emit(DispatchEvent::Response {
                    request_id: ctx.id.clone(),
                    status,
                    retry_count: ctx.retry_count,
                    duration_ms: ctx.elapsed().as_millis() as u64,
                    from_cache: false,
                });
                info!(
                    request_id = %ctx.id,
                    status,
                    retry_count = ctx.retry_count,
                    "stream opened"
                );
                ctx.advance(RequestState::Done);
                Ok(resp)
            }
            Err(e) => Err(self.fail(&mut ctx, e)),
        }
    }

    /// Cancel pending backoff and rate-limit waits, stop the cache sweep,
    /// flush persistent writes, then close the connection pool. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.cache.shutdown().await;
        self.transport.close();
        info!("dispatcher shut down");
    }

    fn start(&self, method: Method, url: &url::Url, cacheable: bool) -> RequestContext {
        let ctx = RequestContext::new(method, url.as_str(), cacheable);
        self.metrics.incr(Counter::Requests);
        self.events.emit(DispatchEvent::RequestStart {
            request_id: ctx.id.clone(),
            method: ctx.method.to_string(),
            url: ctx.url.clone(),
        });
        debug!(request_id = %ctx.id, method = %ctx.method, url = %ctx.url, cacheable, "request start");
        ctx
    }

    /// One unit of rate-limit budget per logical request; retries reuse it.
    async fn admit(&self, ctx: &mut RequestContext) -> Result<()> {
        let metrics = &self.metrics;
        let events = &self.events;
        let acquire = self.limiter.acquire_with(|wait| {
            ctx.advance(RequestState::RateLimitWait);
            metrics.incr(Counter::RateLimited);
            let wait_ms = wait.as_millis() as u64;
            events.emit(DispatchEvent::RateLimited {
                request_id: ctx.id.clone(),
                wait_ms,
            });
            warn!(request_id = %ctx.id, wait_ms, "rate limit budget exhausted; waiting for window reset");
        });
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::shutdown()
                .with_context(ErrorContext::new().with_source("rate_limiter"))),
            _ = acquire => Ok(()),
        }
    }

    async fn run<T, F, Fut>(&self, ctx: &mut RequestContext, mut attempt: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            ctx.advance(RequestState::InFlight);
            let err = match attempt(ctx.id.clone()).await {
                Ok(value) => {
                    ctx.advance(RequestState::Success);
                    return Ok(value);
                }
                Err(err) => err,
            };
            ctx.advance(RequestState::Failure);
            ctx.advance(RequestState::RetryDecision);
            let delay = match self.retry.decide(&err, ctx.retry_count) {
                Decision::Fail => {
                    ctx.advance(RequestState::Fatal);
                    return Err(err);
                }
                Decision::Retry { delay } => delay,
            };

            ctx.advance(RequestState::Retry);
            ctx.retry_count += 1;
            self.metrics.incr(Counter::Retries);
            let delay_ms = delay.as_millis() as u64;
            self.events.emit(DispatchEvent::RetryAttempted {
                request_id: ctx.id.clone(),
                retry_count: ctx.retry_count,
                delay_ms,
                error: err.to_string(),
            });
            warn!(
                request_id = %ctx.id,
                retry_count = ctx.retry_count,
                max_retries = self.retry.max_retries(),
                delay_ms,
                error = %err,
                "retrying request"
            );
            if !self.pause(delay).await {
                ctx.advance(RequestState::Fatal);
                return Err(Error::shutdown().with_context(
                    ErrorContext::new()
                        .with_source("backoff")
                        .with_details(format!("last error: {}", err)),
                ));
            }
        }
    }

    /// Sleep for `delay`; false if shutdown interrupted it.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn complete(&self, ctx: &mut RequestContext, resp: &Response) {
        self.metrics.incr(Counter::Responses);
        self.events.emit(DispatchEvent::Response {
            request_id: ctx.id.clone(),
            status: resp.status,
            retry_count: resp.retry_count,
            duration_ms: resp.duration.as_millis() as u64,
            from_cache: resp.from_cache,
        });
        info!(
            request_id = %ctx.id,
            method = %ctx.method,
            url = %ctx.url,
            status = resp.status,
            retry_count = resp.retry_count,
            from_cache = resp.from_cache,
            duration_ms = resp.duration.as_millis() as u64,
            "request completed"
        );
        ctx.advance(RequestState::Done);
    }

    /// Annotate a terminal error and record it exactly once.
    fn fail(&self, ctx: &mut RequestContext, err: Error) -> Error {
        let err = err.with_context(
            ErrorContext::new()
                .with_request_id(ctx.id.clone())
                .with_retry_count(ctx.retry_count),
        );
        self.metrics.incr(Counter::Errors);
        self.events.emit(DispatchEvent::Error {
            request_id: ctx.id.clone(),
            kind: err.kind().to_string(),
            status: err.status_code(),
            retry_count: ctx.retry_count,
            message: err.to_string(),
        });
        warn!(
            request_id = %ctx.id,
            method = %ctx.method,
            url = %ctx.url,
            kind = err.kind(),
            status = ?err.status_code(),
            retry_count = ctx.retry_count,
            "request failed"
        );
        if ctx.state() != RequestState::Fatal {
            ctx.advance(RequestState::Fatal);
        }
        ctx.advance(RequestState::Done);
        err
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
