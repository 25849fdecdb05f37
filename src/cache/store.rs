//! Cache store collaborator and its in-memory implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Response, StatusCode},
};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::error::CacheError;

/// A fully buffered upstream response, as kept in the cache.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl StoredResponse {
    /// Build a fresh response value. The stored copy is never handed out.
    pub fn to_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Key-value store with per-entry TTL.
///
/// Best effort: implementations may lose entries, and callers treat every
/// error as a miss (on read) or a no-op (on write).
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredResponse>, CacheError>>;

    fn put(
        &self,
        key: String,
        entry: StoredResponse,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>>;
}

struct Slot {
    entry: StoredResponse,
    expires_at: Instant,
}

/// Process-local store backed by `DashMap`.
///
/// Bounded both by entry count and by the total size of stored bodies.
/// Expired entries read as misses and are dropped on access, by
/// [`run_sweeper`], or when a write finds the store full.
#[derive(Clone)]
pub struct MemoryCacheStore {
    inner: Arc<DashMap<String, Slot>>,
    stored_bytes: Arc<AtomicUsize>,
    max_entries: usize,
    max_total_bytes: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize, max_total_bytes: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            stored_bytes: Arc::new(AtomicUsize::new(0)),
            max_entries,
            max_total_bytes,
        }
    }

    /// Number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Total body bytes held, expired entries included.
    pub fn total_bytes(&self) -> usize {
        self.stored_bytes.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.retain(|_, slot| {
            if slot.expires_at > now {
                return true;
            }
            self.release(slot);
            removed += 1;
            false
        });
        removed
    }

    fn release(&self, slot: &Slot) {
        self.stored_bytes
            .fetch_sub(slot.entry.body.len(), Ordering::Relaxed);
    }

    fn lookup(&self, key: &str) -> Option<StoredResponse> {
        let now = Instant::now();
        let hit = self
            .inner
            .get(key)
            .map(|slot| (slot.expires_at > now, slot.entry.clone()));

        match hit {
            Some((true, entry)) => Some(entry),
            Some((false, _)) => {
                if let Some((_, slot)) = self.inner.remove_if(key, |_, slot| slot.expires_at <= now) {
                    self.release(&slot);
                }
                None
            }
            None => None,
        }
    }

    /// Whether `size` more bytes under `key` fit in both budgets.
    /// An entry being overwritten does not count against either.
    fn check_room(&self, key: &str, size: usize) -> Result<(), CacheError> {
        let replaced = self.inner.get(key).map(|slot| slot.entry.body.len());
        if replaced.is_none() && self.inner.len() >= self.max_entries {
            return Err(CacheError::Full(self.max_entries));
        }

        let used = self.total_bytes().saturating_sub(replaced.unwrap_or(0));
        if used.saturating_add(size) > self.max_total_bytes {
            return Err(CacheError::OverBudget(self.max_total_bytes));
        }
        Ok(())
    }

    fn insert(&self, key: String, entry: StoredResponse, ttl: Duration) -> Result<(), CacheError> {
        let size = entry.body.len();
        if let Err(err) = self.check_room(&key, size) {
            // Expired slots still count until swept
            if self.purge_expired() == 0 {
                return Err(err);
            }
            self.check_room(&key, size)?;
        }

        self.stored_bytes.fetch_add(size, Ordering::Relaxed);
        let previous = self.inner.insert(
            key,
            Slot {
                entry,
                expires_at: Instant::now() + ttl,
            },
        );
        if let Some(previous) = previous {
            self.release(&previous);
        }
        Ok(())
    }
}

impl CacheStore for MemoryCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<StoredResponse>, CacheError>> {
        Box::pin(async move { Ok(self.lookup(key)) })
    }

    fn put(
        &self,
        key: String,
        entry: StoredResponse,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move { self.insert(key, entry, ttl) })
    }
}

/// Periodically purge expired entries until shutdown.
pub async fn run_sweeper(
    store: MemoryCacheStore,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Swept expired cache entries");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
