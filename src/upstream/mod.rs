//! Upstream fetch subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardRequest
//!     → fetcher.rs (cache lookup for cacheable targets)
//!     → client.rs (one outbound call, raced against the deadline)
//!     → fetcher.rs (store copy of cacheable 2xx responses)
//! ```

pub mod client;
pub mod fetcher;

pub use client::{HttpUpstream, Upstream, UpstreamRequest};
pub use fetcher::{CacheAsideFetcher, Fetched, Source};
