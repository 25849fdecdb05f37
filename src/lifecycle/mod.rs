//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! signals.rs:  SIGTERM/SIGINT → shutdown.rs trigger
//! shutdown.rs: broadcast → HTTP server drains, cache sweeper exits
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
