//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Carry the parsed inbound call through the pipeline
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing, and echoed back
//! - `ForwardRequest` is immutable once built; stages borrow it

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderName, Method, Request},
};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

use crate::security::TargetUrl;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// One inbound call, parsed and validated.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub target: TargetUrl,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ForwardRequest {
    pub fn new(method: Method, target: TargetUrl, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            target,
            headers,
            body: (!body.is_empty()).then_some(body),
        }
    }
}

/// Generates a UUID v4 for every request without an `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Layer that assigns request IDs.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Read the request ID from a header map.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}
