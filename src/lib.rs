//! Edge image/API forwarding proxy library.
//!
//! Relays requests to an allow-listed set of upstream origins, decorates
//! responses with CORS and security headers and caches a subset of
//! upstream responses cache-aside.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{FetchError, ProxyError, Rejected};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
