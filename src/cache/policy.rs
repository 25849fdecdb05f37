//! Which targets are cached, and under what key.

use std::time::Duration;

use axum::http::{header::InvalidHeaderValue, HeaderValue};

use crate::config::CacheConfig;
use crate::security::TargetUrl;

/// Static, content-based cache classification.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    enabled: bool,
    namespace: String,
    path_marker: String,
    ttl: Duration,
    cache_control: HeaderValue,
    max_body_bytes: usize,
}

impl CachePolicy {
    pub fn new(config: &CacheConfig) -> Result<Self, InvalidHeaderValue> {
        let cache_control = HeaderValue::from_str(&format!(
            "public, max-age={}, stale-while-revalidate={}",
            config.ttl_secs, config.stale_while_revalidate_secs
        ))?;

        Ok(Self {
            enabled: config.enabled,
            namespace: config.namespace.clone(),
            path_marker: config.path_marker.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
            cache_control,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// A target is cacheable iff caching is on and its path contains the marker.
    pub fn is_cacheable(&self, target: &TargetUrl) -> bool {
        self.enabled && target.path().contains(self.path_marker.as_str())
    }

    /// Namespace + literal target. No normalization.
    pub fn key_for(&self, target: &TargetUrl) -> String {
        format!("{}{}", self.namespace, target.as_str())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `Cache-Control` value set on cacheable responses.
    pub fn cache_control(&self) -> &HeaderValue {
        &self.cache_control
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}
