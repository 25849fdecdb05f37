//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → allow_list.rs (target must start with an allowed prefix)
//!     → Pass to fetch
//! Outgoing response:
//!     → headers.rs (CORS, nosniff)
//! ```
//!
//! # Design Decisions
//! - Reject before any network or cache activity
//! - Every response is readable by the calling front end, errors included

pub mod allow_list;
pub mod headers;

pub use allow_list::{AllowList, TargetUrl, TARGET_PARAM};
pub use headers::ResponseDecorator;
