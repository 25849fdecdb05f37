//! Cache-aside fetch.
//!
//! # Responsibilities
//! - Serve cacheable targets from the store on a hit, without touching the upstream
//! - Otherwise fetch once, racing the call against the configured deadline
//! - Store successful cacheable responses under the target's key
//!
//! # Design Decisions
//! - Only GET is cacheable; POST and HEAD always go upstream
//! - Only 2xx responses are stored; other statuses pass through untouched
//! - Cache read and write failures are logged and treated as a miss / no-op
//! - No retries: a failure is reported once
//! - One deadline covers the response head and, for cacheable responses,
//!   buffering the body; a stalled body is a timeout, not a hung request
//! - `Set-Cookie` is served to the caller that caused the fetch but never stored

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{
        header::{self, HeaderName, HeaderValue},
        response::Parts,
        HeaderMap, Method, Response,
    },
};
use futures_util::{stream, StreamExt};
use tokio::time::{self, Instant};

use crate::cache::{CachePolicy, CacheStore, StoredResponse};
use crate::config::UpstreamConfig;
use crate::error::{FetchError, SetupError};
use crate::http::request::ForwardRequest;
use crate::observability::metrics;
use crate::resilience::{race_deadline, RaceError};
use crate::upstream::client::{Upstream, UpstreamRequest};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Upstream,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "hit",
            Source::Upstream => "miss",
        }
    }
}

/// A response produced by the fetcher, not yet decorated.
#[derive(Debug)]
pub struct Fetched {
    pub response: Response<Body>,
    pub source: Source,
}

enum Buffered {
    Complete(Bytes),
    Overflow(Body),
}

/// The fetch stage of the pipeline.
pub struct CacheAsideFetcher {
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn CacheStore>,
    policy: CachePolicy,
    timeout: Duration,
    forward_headers: Vec<HeaderName>,
    default_user_agent: Option<HeaderValue>,
    default_referer: Option<HeaderValue>,
    strict_status: bool,
}

impl CacheAsideFetcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
        policy: CachePolicy,
        config: &UpstreamConfig,
    ) -> Result<Self, SetupError> {
        let forward_headers = config
            .forward_headers
            .iter()
            .map(|name| HeaderName::from_bytes(name.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let default_user_agent = non_empty(&config.default_user_agent)
            .map(HeaderValue::from_str)
            .transpose()?;
        let default_referer = config
            .default_referer
            .as_deref()
            .and_then(non_empty)
            .map(HeaderValue::from_str)
            .transpose()?;

        Ok(Self {
            upstream,
            cache,
            policy,
            timeout: Duration::from_secs(config.timeout_secs),
            forward_headers,
            default_user_agent,
            default_referer,
            strict_status: config.strict_status,
        })
    }

    /// Serve from cache or fetch from the upstream.
    pub async fn fetch_or_serve(&self, request: &ForwardRequest) -> Result<Fetched, FetchError> {
        let key = (request.method == Method::GET && self.policy.is_cacheable(&request.target))
            .then(|| self.policy.key_for(&request.target));

        if let Some(key) = &key {
            match self.cache.get(key).await {
                Ok(Some(stored)) => {
                    metrics::record_cache_lookup("hit");
                    tracing::debug!(target_url = %request.target, "Cache hit");
                    return Ok(Fetched {
                        response: stored.to_response(),
                        source: Source::Cache,
                    });
                }
                Ok(None) => metrics::record_cache_lookup("miss"),
                Err(e) => {
                    metrics::record_cache_lookup("error");
                    tracing::warn!(target_url = %request.target, error = %e, "Cache lookup failed, fetching upstream");
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let response = self.fetch(request).await.inspect_err(|e| {
            metrics::record_upstream_failure(e.kind());
        })?;

        if self.strict_status && !response.status().is_success() {
            let status = response.status().as_u16();
            metrics::record_upstream_failure("status");
            return Err(FetchError::UpstreamStatus(status));
        }

        let response = match key {
            Some(key) if response.status().is_success() => self
                .store(key, response, deadline)
                .await
                .inspect_err(|e| metrics::record_upstream_failure(e.kind()))?,
            _ => response,
        };

        Ok(Fetched {
            response,
            source: Source::Upstream,
        })
    }

    async fn fetch(&self, request: &ForwardRequest) -> Result<Response<Body>, FetchError> {
        let outbound = UpstreamRequest {
            method: request.method.clone(),
            url: request.target.url().clone(),
            headers: self.upstream_headers(&request.headers),
            body: request.body.clone(),
        };

        tracing::debug!(
            method = %request.method,
            target_url = %request.target,
            timeout = ?self.timeout,
            "Fetching upstream"
        );

        match race_deadline(self.upstream.send(outbound), self.timeout).await {
            Ok(result) => result,
            Err(RaceError::Elapsed(_)) => Err(FetchError::Timeout),
            Err(RaceError::Join(e)) => Err(FetchError::Network(e.to_string())),
        }
    }

    /// Copy the configured inbound headers, filling in browser-like defaults.
    fn upstream_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for name in &self.forward_headers {
            for value in inbound.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        if !headers.contains_key(header::USER_AGENT) {
            if let Some(ua) = &self.default_user_agent {
                headers.insert(header::USER_AGENT, ua.clone());
            }
        }
        if !headers.contains_key(header::REFERER) {
            if let Some(referer) = &self.default_referer {
                headers.insert(header::REFERER, referer.clone());
            }
        }
        headers
    }

    /// Mark the response cacheable, buffer it and write a copy to the store.
    ///
    /// Buffering must finish by `deadline`, the same instant the head race ends.
    async fn store(
        &self,
        key: String,
        response: Response<Body>,
        deadline: Instant,
    ) -> Result<Response<Body>, FetchError> {
        let (mut parts, body) = response.into_parts();
        parts
            .headers
            .insert(header::CACHE_CONTROL, self.policy.cache_control().clone());

        let limit = self.policy.max_body_bytes();
        if declared_length(&parts).is_some_and(|len| len > limit as u64) {
            metrics::record_cache_write("skipped");
            tracing::debug!(key = %key, "Response exceeds cacheable size, streaming uncached");
            return Ok(Response::from_parts(parts, body));
        }

        let buffered = time::timeout_at(deadline, buffer_body(body, limit))
            .await
            .map_err(|_| FetchError::Timeout)
            .inspect_err(|_| tracing::warn!(key = %key, "Upstream body stalled past the deadline"))??;

        let bytes = match buffered {
            Buffered::Complete(bytes) => bytes,
            Buffered::Overflow(body) => {
                metrics::record_cache_write("skipped");
                tracing::debug!(key = %key, "Response exceeds cacheable size, streaming uncached");
                return Ok(Response::from_parts(parts, body));
            }
        };

        let mut stored_headers = parts.headers.clone();
        stored_headers.remove(header::SET_COOKIE);
        let entry = StoredResponse {
            status: parts.status,
            headers: stored_headers,
            body: bytes.clone(),
        };
        match self.cache.put(key.clone(), entry, self.policy.ttl()).await {
            Ok(()) => {
                metrics::record_cache_write("stored");
                tracing::debug!(key = %key, bytes = bytes.len(), ttl = ?self.policy.ttl(), "Cached response");
            }
            Err(e) => {
                metrics::record_cache_write("error");
                tracing::warn!(key = %key, error = %e, "Cache write failed, continuing uncached");
            }
        }

        Ok(Response::from_parts(parts, Body::from(bytes)))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.trim().is_empty()).then_some(s)
}

fn declared_length(parts: &Parts) -> Option<u64> {
    parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Read the body up to `limit` bytes.
///
/// Past the limit, the chunks already read are chained in front of the
/// remaining stream so the body is still delivered in a single pass.
async fn buffer_body(body: Body, limit: usize) -> Result<Buffered, FetchError> {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
        total += chunk.len();
        chunks.push(chunk);

        if total > limit {
            let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Overflow(Body::from_stream(head.chain(data))));
        }
    }

    let mut joined = Vec::with_capacity(total);
    for chunk in &chunks {
        joined.extend_from_slice(chunk);
    }
    Ok(Buffered::Complete(Bytes::from(joined)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::http::StatusCode;
    use futures_util::future::BoxFuture;

    use crate::cache::MemoryCacheStore;
    use crate::config::CacheConfig;
    use crate::error::CacheError;
    use crate::security::AllowList;

    /// Upstream double that records every call.
    struct StubUpstream {
        status: StatusCode,
        body: &'static str,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<UpstreamRequest>>,
    }

    impl StubUpstream {
        fn new(status: StatusCode, body: &'static str) -> Arc<Self> {
            Self::delayed(status, body, Duration::ZERO)
        }

        fn delayed(status: StatusCode, body: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                delay,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Upstream for StubUpstream {
        fn send(&self, request: UpstreamRequest) -> BoxFuture<'static, Result<Response<Body>, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            let (status, body, delay) = (self.status, self.body, self.delay);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
                Ok(response)
            })
        }
    }

    /// Upstream whose response is built by a closure on every call.
    struct FnUpstream<F>(F);

    impl<F> Upstream for FnUpstream<F>
    where
        F: Fn() -> Response<Body> + Send + Sync,
    {
        fn send(&self, _request: UpstreamRequest) -> BoxFuture<'static, Result<Response<Body>, FetchError>> {
            let response = (self.0)();
            Box::pin(async move { Ok(response) })
        }
    }

    struct FailingStore;

    impl CacheStore for FailingStore {
        fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<StoredResponse>, CacheError>> {
            Box::pin(async { Err(CacheError::Unavailable("down".into())) })
        }

        fn put(&self, _key: String, _entry: StoredResponse, _ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Err(CacheError::Unavailable("down".into())) })
        }
    }

    fn fetcher(upstream: Arc<dyn Upstream>, cache: Arc<dyn CacheStore>) -> CacheAsideFetcher {
        fetcher_with(upstream, cache, &CacheConfig::default(), &UpstreamConfig::default())
    }

    fn fetcher_with(
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
        cache_config: &CacheConfig,
        upstream_config: &UpstreamConfig,
    ) -> CacheAsideFetcher {
        let policy = CachePolicy::new(cache_config).unwrap();
        CacheAsideFetcher::new(upstream, cache, policy, upstream_config).unwrap()
    }

    fn request(method: Method, target: &str) -> ForwardRequest {
        let target = AllowList::new(vec!["https://".into()])
            .validate(&format!("/proxy?target={}", target).parse().unwrap())
            .unwrap();
        ForwardRequest::new(method, target, HeaderMap::new(), Bytes::new())
    }

    async fn body_of(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    const PIXIV: &str = "https://image.anosu.top/pixiv/direct/123";

    #[tokio::test]
    async fn test_cacheable_miss_then_hit() {
        let upstream = StubUpstream::new(StatusCode::OK, "jpeg-bytes");
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream.clone(), Arc::new(store.clone()));

        let first = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(first.source, Source::Upstream);
        assert_eq!(
            first.response.headers()[header::CACHE_CONTROL],
            "public, max-age=3600, stale-while-revalidate=86400"
        );
        assert_eq!(body_of(first.response).await, "jpeg-bytes");
        assert_eq!(store.len(), 1);

        let second = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(second.source, Source::Cache);
        assert_eq!(second.response.status(), StatusCode::OK);
        assert_eq!(second.response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_of(second.response).await, "jpeg-bytes");

        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_cacheable_always_fetches() {
        let upstream = StubUpstream::new(StatusCode::OK, "{}");
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream.clone(), Arc::new(store.clone()));

        for _ in 0..2 {
            let fetched = fetcher
                .fetch_or_serve(&request(Method::GET, "https://nekos.best/api/v2/neko"))
                .await
                .unwrap();
            assert!(fetched.response.headers().get(header::CACHE_CONTROL).is_none());
        }
        assert_eq!(upstream.calls(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_post_is_never_cached() {
        let upstream = StubUpstream::new(StatusCode::OK, "ok");
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream.clone(), Arc::new(store.clone()));

        fetcher.fetch_or_serve(&request(Method::POST, PIXIV)).await.unwrap();
        fetcher.fetch_or_serve(&request(Method::POST, PIXIV)).await.unwrap();
        assert_eq!(upstream.calls(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_passes_through_uncached() {
        let upstream = StubUpstream::new(StatusCode::NOT_FOUND, "missing");
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream.clone(), Arc::new(store.clone()));

        let fetched = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(fetched.response.status(), StatusCode::NOT_FOUND);
        assert!(fetched.response.headers().get(header::CACHE_CONTROL).is_none());
        assert_eq!(body_of(fetched.response).await, "missing");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_strict_status() {
        let upstream = StubUpstream::new(StatusCode::BAD_GATEWAY, "bad");
        let config = UpstreamConfig {
            strict_status: true,
            ..UpstreamConfig::default()
        };
        let fetcher = fetcher_with(
            upstream,
            Arc::new(MemoryCacheStore::new(16, 1 << 20)),
            &CacheConfig::default(),
            &config,
        );

        let err = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap_err();
        assert_eq!(err, FetchError::UpstreamStatus(502));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let upstream = StubUpstream::delayed(StatusCode::OK, "late", Duration::from_secs(30));
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream.clone(), Arc::new(store.clone()));

        let start = tokio::time::Instant::now();
        let err = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
        assert!(start.elapsed() < Duration::from_secs(11));
        assert_eq!(upstream.calls(), 1);

        // The abandoned call finishing later must not populate the cache
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_cacheable_body_times_out() {
        let upstream = Arc::new(FnUpstream(|| {
            let chunks = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
                .chain(stream::pending());
            Response::new(Body::from_stream(chunks))
        }));
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream, Arc::new(store.clone()));

        let start = Instant::now();
        let err = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_cookie_is_not_cached() {
        let upstream = Arc::new(FnUpstream(|| {
            let mut response = Response::new(Body::from("jpeg"));
            response
                .headers_mut()
                .insert(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
            response
        }));
        let store = MemoryCacheStore::new(16, 1 << 20);
        let fetcher = fetcher(upstream, Arc::new(store.clone()));

        let first = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(first.source, Source::Upstream);
        assert_eq!(first.response.headers()[header::SET_COOKIE], "session=abc");

        let second = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(second.source, Source::Cache);
        assert!(second.response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_of(second.response).await, "jpeg");
    }

    #[tokio::test]
    async fn test_failing_store_is_non_fatal() {
        let upstream = StubUpstream::new(StatusCode::OK, "jpeg");
        let fetcher = fetcher(upstream.clone(), Arc::new(FailingStore));

        for _ in 0..2 {
            let fetched = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
            assert_eq!(fetched.source, Source::Upstream);
            assert_eq!(body_of(fetched.response).await, "jpeg");
        }
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn test_oversized_body_streams_uncached() {
        let upstream = StubUpstream::new(StatusCode::OK, "0123456789");
        let store = MemoryCacheStore::new(16, 1 << 20);
        let cache_config = CacheConfig {
            max_body_bytes: 4,
            ..CacheConfig::default()
        };
        let fetcher = fetcher_with(
            upstream,
            Arc::new(store.clone()),
            &cache_config,
            &UpstreamConfig::default(),
        );

        let fetched = fetcher.fetch_or_serve(&request(Method::GET, PIXIV)).await.unwrap();
        assert_eq!(body_of(fetched.response).await, "0123456789");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_headers() {
        let upstream = StubUpstream::new(StatusCode::OK, "");
        let fetcher = fetcher(upstream.clone(), Arc::new(MemoryCacheStore::new(16, 1 << 20)));

        let mut req = request(Method::GET, "https://nekos.best/api");
        req.headers.insert(header::ACCEPT, HeaderValue::from_static("image/*"));
        req.headers.insert(header::COOKIE, HeaderValue::from_static("secret=1"));
        req.headers.insert(header::REFERER, HeaderValue::from_static("https://caller.example/"));
        fetcher.fetch_or_serve(&req).await.unwrap();

        let seen = upstream.seen.lock().unwrap();
        let headers = &seen[0].headers;
        assert_eq!(headers[header::ACCEPT], "image/*");
        assert_eq!(headers[header::REFERER], "https://caller.example/");
        assert!(headers[header::USER_AGENT].to_str().unwrap().starts_with("Mozilla/5.0"));
        assert!(headers.get(header::COOKIE).is_none());
        assert_eq!(seen[0].url.as_str(), "https://nekos.best/api");
    }

    #[tokio::test]
    async fn test_buffer_body_overflow_keeps_all_bytes() {
        let body = Body::from_stream(stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
            Ok(Bytes::from_static(b"ghi")),
        ]));

        match buffer_body(body, 4).await.unwrap() {
            Buffered::Overflow(rest) => {
                assert_eq!(axum::body::to_bytes(rest, usize::MAX).await.unwrap(), "abcdefghi");
            }
            Buffered::Complete(_) => panic!("expected overflow"),
        }
    }
}
