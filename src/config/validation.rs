//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check allow-list entries are absolute http(s) URLs
//! - Validate value ranges (timeouts > 0, TTL > 0)
//! - Check header names are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderName;
use thiserror::Error;
use url::Url;

use crate::config::schema::{CorsMode, ProxyConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.listener.route_path.starts_with('/') {
        errors.push(ValidationError::new("listener.route_path", "must start with '/'"));
    }

    if config.targets.allowed_prefixes.is_empty() {
        errors.push(ValidationError::new(
            "targets.allowed_prefixes",
            "at least one prefix is required",
        ));
    }
    for prefix in &config.targets.allowed_prefixes {
        match Url::parse(prefix) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => errors.push(ValidationError::new(
                "targets.allowed_prefixes",
                format!("'{}' is not an absolute http(s) URL", prefix),
            )),
        }
    }

    if config.cors.mode == CorsMode::Static && config.cors.allowed_origin.trim().is_empty() {
        errors.push(ValidationError::new(
            "cors.allowed_origin",
            "required when cors.mode is \"static\"",
        ));
    }

    if config.cache.enabled {
        if config.cache.namespace.is_empty() {
            errors.push(ValidationError::new("cache.namespace", "must not be empty"));
        }
        if config.cache.path_marker.is_empty() {
            errors.push(ValidationError::new("cache.path_marker", "must not be empty"));
        }
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::new("cache.ttl_secs", "must be greater than 0"));
        }
        if config.cache.max_entries == 0 {
            errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
        }
        if config.cache.max_total_bytes < config.cache.max_body_bytes {
            errors.push(ValidationError::new(
                "cache.max_total_bytes",
                "must be at least cache.max_body_bytes",
            ));
        }
        if config.cache.sweep_interval_secs == 0 {
            errors.push(ValidationError::new(
                "cache.sweep_interval_secs",
                "must be greater than 0",
            ));
        }
    }

    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than 0"));
    }
    for name in &config.upstream.forward_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "upstream.forward_headers",
                format!("'{}' is not a valid header name", name),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
