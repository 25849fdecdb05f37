//! Response construction.
//!
//! # Responsibilities
//! - Map pipeline errors to plain-text HTTP responses
//! - Name the outgoing response type
//!
//! # Design Decisions
//! - Error responses are built undecorated; the handler decorates every
//!   response exactly once on the way out
//! - Error bodies are short and human readable

use axum::{
    body::Body,
    http::{header, HeaderValue, Response},
    response::IntoResponse,
};

use crate::error::ProxyError;

/// What the pipeline hands back to the caller.
pub type ForwardResponse = Response<Body>;

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
