//! CORS and security response headers.
//!
//! # Responsibilities
//! - Overlay CORS headers on every outgoing response
//! - Add `X-Content-Type-Options` (and optionally `X-XSS-Protection`)
//! - Build the OPTIONS preflight answer
//!
//! # Design Decisions
//! - Decoration takes the response by value and rebuilds it from its parts,
//!   so the body is moved, never read
//! - Upstream `Access-Control-*` headers are dropped before the overlay; the
//!   proxy is the only authority on CORS for its callers
//! - `Vary: Origin` is appended, keeping any `Vary` the upstream sent

use axum::{
    body::Body,
    http::{
        header::{self, InvalidHeaderValue},
        HeaderMap, HeaderName, HeaderValue, Response, StatusCode,
    },
};

use crate::config::{CorsConfig, CorsMode, SecurityConfig};

pub const X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");

const ACCESS_CONTROL_PREFIX: &str = "access-control-";

/// Applies CORS and security headers uniformly to every response path.
#[derive(Debug, Clone)]
pub struct ResponseDecorator {
    mode: CorsMode,
    static_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
    xss_protection: bool,
}

impl ResponseDecorator {
    pub fn new(cors: &CorsConfig, security: &SecurityConfig) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            mode: cors.mode,
            static_origin: HeaderValue::from_str(&cors.allowed_origin)?,
            allow_methods: HeaderValue::from_str(&cors.allow_methods)?,
            allow_headers: HeaderValue::from_str(&cors.allow_headers)?,
            max_age: HeaderValue::from(cors.max_age_secs),
            xss_protection: security.xss_protection,
        })
    }

    /// Decorate a response on its way to the caller.
    pub fn decorate(&self, response: Response<Body>, origin: Option<&HeaderValue>) -> Response<Body> {
        let (mut parts, body) = response.into_parts();
        strip_access_control(&mut parts.headers);
        self.apply_cors(&mut parts.headers, origin);

        parts.headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        if self.xss_protection {
            parts
                .headers
                .insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        }

        Response::from_parts(parts, body)
    }

    /// Answer a CORS preflight: 204, CORS headers only, empty body.
    pub fn preflight(&self, origin: Option<&HeaderValue>) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;

        let headers = response.headers_mut();
        self.apply_cors(headers, origin);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        if self.mode == CorsMode::Static {
            append_vary_origin(headers);
        }
        response
    }

    fn allow_origin(&self, origin: Option<&HeaderValue>) -> HeaderValue {
        match self.mode {
            CorsMode::Static => self.static_origin.clone(),
            CorsMode::Echo => origin
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("*")),
        }
    }

    fn apply_cors(&self, headers: &mut HeaderMap, origin: Option<&HeaderValue>) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin(origin));
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        if self.mode == CorsMode::Echo {
            append_vary_origin(headers);
        }
    }
}

fn strip_access_control(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(ACCESS_CONTROL_PREFIX))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

fn append_vary_origin(headers: &mut HeaderMap) {
    let already = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|v| v == "*" || v.eq_ignore_ascii_case("origin"));

    if !already {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}
