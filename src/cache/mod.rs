//! Cache-aside storage subsystem.
//!
//! # Data Flow
//! ```text
//! validated target
//!     → policy.rs (cacheable? key = namespace + literal target)
//!     → store.rs (get / put with TTL)
//! ```
//!
//! # Design Decisions
//! - The store is a collaborator behind a trait; the pipeline never assumes
//!   strong consistency or durability
//! - Concurrent misses for one key may both fetch and both write
//! - Entries are never deleted explicitly, only expired

pub mod policy;
pub mod store;

pub use policy::CachePolicy;
pub use store::{run_sweeper, CacheStore, MemoryCacheStore, StoredResponse};
