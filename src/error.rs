//! Error types shared across the forwarding pipeline.
//!
//! # Design Decisions
//! - Validation, fetch and cache failures are distinct types so each stage
//!   can only produce the errors it owns
//! - `ProxyError` is the single type the handler turns into a response
//! - Cache errors never reach `ProxyError`; they are logged and dropped

use axum::http::StatusCode;
use thiserror::Error;

/// Why a target was refused by the allow-list check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No `target` parameter, or an empty one.
    Missing,
    /// The target does not start with any allow-listed prefix.
    NotAllowed,
    /// Prefix matched but the string is not an absolute URL.
    Malformed,
}

impl RejectReason {
    /// Short label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Missing => "missing",
            RejectReason::NotAllowed => "not_allowed",
            RejectReason::Malformed => "malformed",
        }
    }
}

/// The target failed validation. Always answered with 403.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Invalid target URL")]
pub struct Rejected {
    pub reason: RejectReason,
}

impl Rejected {
    pub fn new(reason: RejectReason) -> Self {
        Self { reason }
    }
}

/// Upstream fetch failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The upstream did not answer within the configured budget.
    #[error("Timeout")]
    Timeout,

    /// DNS, connect, TLS or body transfer failure.
    #[error("{0}")]
    Network(String),

    /// Non-2xx status while strict status checking is enabled.
    #[error("Target server responded with {0}")]
    UpstreamStatus(u16),
}

impl FetchError {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Network(_) => "network",
            FetchError::UpstreamStatus(_) => "status",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Cache store failure. Non-fatal by contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache store is full ({0} entries)")]
    Full(usize),

    #[error("cache store byte budget of {0} bytes exhausted")]
    OverBudget(usize),

    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Anything the `/proxy` handler can answer with instead of a forwarded response.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("Proxy failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body too large")]
    BodyTooLarge,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Rejected(_) => StatusCode::FORBIDDEN,
            ProxyError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Failure while turning a validated config into running components.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid header value in configuration: {0}")]
    HeaderValue(#[from] axum::http::header::InvalidHeaderValue),

    #[error("invalid header name in configuration: {0}")]
    HeaderName(#[from] axum::http::header::InvalidHeaderName),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
