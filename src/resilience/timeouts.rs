//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race an upstream call against a fixed deadline
//! - Report which side settled first
//!
//! # Design Decisions
//! - The call runs as its own task; losing the race drops the join handle,
//!   which detaches the task instead of aborting it
//! - Callers must tolerate the detached call finishing after the deadline
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

/// Outcome of a lost or broken race.
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("deadline of {0:?} elapsed")]
    Elapsed(Duration),

    #[error("task failed: {0}")]
    Join(#[from] JoinError),
}

/// Run `fut` to completion unless `deadline` elapses first.
///
/// On timeout the future keeps running in the background and its output is
/// discarded.
pub async fn race_deadline<F>(fut: F, deadline: Duration) -> Result<F::Output, RaceError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(fut);

    tokio::select! {
        joined = handle => joined.map_err(RaceError::from),
        _ = tokio::time::sleep(deadline) => Err(RaceError::Elapsed(deadline)),
    }
}
