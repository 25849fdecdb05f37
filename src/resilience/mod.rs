//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (race the call against the deadline)
//!     → On failure: surfaced once to the caller, never retried
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No retries and no circuit breaking: a failure is answered immediately

pub mod timeouts;

pub use timeouts::{race_deadline, RaceError};
