//! Outbound HTTP client.
//!
//! # Responsibilities
//! - Send one request to the validated target
//! - Return the response head with a streaming body
//! - Strip hop-by-hop headers from the upstream response
//!
//! # Design Decisions
//! - Redirects are followed by the client and count against the deadline
//! - The returned future is `'static` so it can outlive the caller when a
//!   timeout race is lost

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, Method, Response},
};
use futures_util::future::BoxFuture;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::{FetchError, SetupError};

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A request ready to go to the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// The single outbound call of the pipeline.
pub trait Upstream: Send + Sync {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'static, Result<Response<Body>, FetchError>>;
}

/// `reqwest`-backed upstream.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl Upstream for HttpUpstream {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'static, Result<Response<Body>, FetchError>> {
        let client = self.client.clone();

        Box::pin(async move {
            let mut builder = client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let upstream = builder.send().await?;
            tracing::trace!(status = %upstream.status(), "Upstream responded");

            let status = upstream.status();
            let mut headers = upstream.headers().clone();
            strip_hop_by_hop(&mut headers);

            let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            Ok(response)
        })
    }
}

/// Remove connection-scoped headers that must not be relayed.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
