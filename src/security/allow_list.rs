//! Target validation against the allow-list.
//!
//! # Responsibilities
//! - Extract the `target` query parameter from the inbound URI
//! - Accept it only if it starts with an allow-listed prefix
//! - Hand the literal string onward, unmodified
//!
//! # Design Decisions
//! - Plain string prefix match, not a parsed-origin comparison. This is
//!   permissive: `https://nekos.best.example` passes a `https://nekos.best`
//!   entry. Configure prefixes with a trailing `/` to tighten it.
//! - Case-sensitive, no percent-decoding beyond query-string decoding
//! - No side effects

use axum::http::Uri;
use url::{form_urlencoded, Url};

use crate::error::{RejectReason, Rejected};

/// Name of the query parameter carrying the upstream URL.
pub const TARGET_PARAM: &str = "target";

/// A validated upstream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    raw: String,
    parsed: Url,
}

impl TargetUrl {
    /// The literal target string as supplied by the caller.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed form used for the outbound request.
    pub fn url(&self) -> &Url {
        &self.parsed
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.parsed.path()
    }
}

impl std::fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Ordered set of origin prefixes, read-only after construction.
#[derive(Debug, Clone)]
pub struct AllowList {
    prefixes: Vec<String>,
}

impl AllowList {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// Returns true if `target` starts with any configured prefix.
    pub fn permits(&self, target: &str) -> bool {
        self.prefixes.iter().any(|p| target.starts_with(p.as_str()))
    }

    /// Validate the `target` parameter of an inbound request URI.
    pub fn validate(&self, uri: &Uri) -> Result<TargetUrl, Rejected> {
        let raw = uri
            .query()
            .and_then(extract_target)
            .filter(|t| !t.is_empty())
            .ok_or(Rejected::new(RejectReason::Missing))?;

        if !self.permits(&raw) {
            return Err(Rejected::new(RejectReason::NotAllowed));
        }

        let parsed = Url::parse(&raw).map_err(|_| Rejected::new(RejectReason::Malformed))?;
        if parsed.cannot_be_a_base() {
            return Err(Rejected::new(RejectReason::Malformed));
        }

        Ok(TargetUrl { raw, parsed })
    }
}

/// First `target` value in a form-urlencoded query string.
fn extract_target(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == TARGET_PARAM)
        .map(|(_, v)| v.into_owned())
}
