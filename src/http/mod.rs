//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace span)
//!     → request.rs (ForwardRequest, request ID)
//!     → [allow-list validates target]
//!     → [cache-aside fetcher serves or fetches]
//!     → response.rs (error mapping) + security::headers (decoration)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ForwardRequest, RequestIdExt, X_REQUEST_ID};
pub use response::ForwardResponse;
pub use server::{AppState, HttpServer};
