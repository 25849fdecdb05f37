//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every section defaults so that an empty file is a working configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, route).
    pub listener: ListenerConfig,

    /// Upstream origins permitted as targets.
    pub targets: TargetsConfig,

    /// CORS response headers.
    pub cors: CorsConfig,

    /// Cache-aside settings.
    pub cache: CacheConfig,

    /// Upstream fetch settings.
    pub upstream: UpstreamConfig,

    /// Security response headers.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path the forwarding function is mounted on.
    pub route_path: String,

    /// Maximum inbound request body forwarded upstream, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            route_path: "/proxy".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// The allow-list of target prefixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetsConfig {
    /// A target is accepted iff it starts with one of these strings.
    pub allowed_prefixes: Vec<String>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec![
                "https://www.loliapi.com".to_string(),
                "https://nekos.best".to_string(),
                "https://api.waifu.im".to_string(),
                "https://image.anosu.top".to_string(),
                "https://aetck.netlify.app".to_string(),
            ],
        }
    }
}

/// How `Access-Control-Allow-Origin` is chosen.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorsMode {
    /// Echo the caller's `Origin` header (and send `Vary: Origin`).
    #[default]
    Echo,
    /// Always send the configured front-end origin.
    Static,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub mode: CorsMode,

    /// Front-end origin used in static mode.
    pub allowed_origin: String,

    pub allow_methods: String,

    pub allow_headers: String,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            mode: CorsMode::Echo,
            allowed_origin: "https://aetck.netlify.app".to_string(),
            allow_methods: "GET, POST, OPTIONS".to_string(),
            allow_headers: "Content-Type, Origin, Referer, User-Agent, Accept".to_string(),
            max_age_secs: 86_400,
        }
    }
}

/// Cache-aside configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching of marker targets.
    pub enabled: bool,

    /// Prefix prepended to the literal target to form the cache key.
    pub namespace: String,

    /// Targets whose path contains this substring are cacheable.
    pub path_marker: String,

    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,

    /// `stale-while-revalidate` advertised on cacheable responses.
    pub stale_while_revalidate_secs: u64,

    /// Bodies larger than this are streamed through without caching.
    pub max_body_bytes: usize,

    /// Entry capacity of the in-memory store.
    pub max_entries: usize,

    /// Upper bound on the summed body size held by the in-memory store.
    pub max_total_bytes: usize,

    /// How often expired entries are swept from the in-memory store.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "__proxy_cache__".to_string(),
            path_marker: "pixiv/".to_string(),
            ttl_secs: 3600,
            stale_while_revalidate_secs: 86_400,
            max_body_bytes: 16 * 1024 * 1024,
            max_entries: 4096,
            max_total_bytes: 256 * 1024 * 1024,
            sweep_interval_secs: 60,
        }
    }
}

/// Upstream fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Budget for the upstream to produce a response head, in seconds.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Inbound headers copied onto the upstream request (case-insensitive).
    pub forward_headers: Vec<String>,

    /// Sent when the caller provides no `User-Agent`.
    pub default_user_agent: String,

    /// Sent when the caller provides no `Referer`.
    pub default_referer: Option<String>,

    /// Treat non-2xx upstream statuses as failures.
    pub strict_status: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            connect_timeout_secs: 5,
            forward_headers: vec![
                "user-agent".to_string(),
                "accept".to_string(),
                "referer".to_string(),
                "content-type".to_string(),
                "accept-language".to_string(),
            ],
            default_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                .to_string(),
            default_referer: Some("https://aetck.netlify.app".to_string()),
            strict_status: false,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add `X-XSS-Protection: 1; mode=block`.
    pub xss_protection: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            xss_protection: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
