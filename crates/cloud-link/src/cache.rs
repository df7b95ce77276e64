//! Short-lived read-through cache for reference data.
//!
//! Each [`TtlCell`] holds at most one value. Expiry is lazy: an expired value
//! is cleared by the read that notices it, there is no background sweep.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::bridge::{Bridge, CallFuture};
use crate::error::Result;

/// Validity of a cached value unless configured otherwise
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// A single cached value with a fixed time-to-live.
pub struct TtlCell<T> {
    ttl: Duration,
    slot: Mutex<Option<Entry<T>>>,
}

impl<T> fmt::Debug for TtlCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.lock().is_some();
        f.debug_struct("TtlCell")
            .field("ttl", &self.ttl)
            .field("cached", &cached)
            .finish()
    }
}

impl<T> Default for TtlCell<T> {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl<T> TtlCell<T> {
    /// Create an empty cell with [`DEFAULT_TTL`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cell whose values live for `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Time-to-live of values written to this cell.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value`, valid until now + TTL.
    pub fn write(&self, value: T) {
        let expires_at = Instant::now() + self.ttl;
        *self.lock() = Some(Entry { value, expires_at });
    }

    /// Drop the cached value, if any.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    // A panic while holding the lock cannot leave the slot half-written.
    fn lock(&self) -> MutexGuard<'_, Option<Entry<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> TtlCell<T> {
    /// The cached value if present and unexpired. Never fetches.
    pub fn read(&self) -> Option<T> {
        let mut slot = self.lock();
        match slot.as_ref() {
            Some(entry) if Instant::now() <= entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }
}

impl<T: Clone + Send + 'static> TtlCell<T> {
    /// The cached value, or a fetch through `bridge` that refills the cell.
    ///
    /// Every miss issues its own fetch; concurrent misses are not coalesced.
    /// A failed fetch leaves the cell untouched.
    pub fn read_or_fetch<F, Fut>(self: &Arc<Self>, bridge: &Bridge, fetch: F) -> CallFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.read() {
            return CallFuture::ready(value);
        }

        let cell = Arc::clone(self);
        let upstream = fetch();
        bridge.dispatch(async move {
            let value = upstream.await?;
            cell.write(value.clone());
            Ok(value)
        })
    }

    /// The best snapshot available right now.
    ///
    /// When the cell is empty or stale a refresh is started in the background
    /// so later readers find a value; this call does not wait for it.
    pub fn read_now_and_refresh<F, Fut>(self: &Arc<Self>, bridge: &Bridge, fetch: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cached = self.read();
        if cached.is_none() {
            // The bridge keeps the call running after the future is dropped.
            drop(self.read_or_fetch(bridge, fetch));
        }
        cached
    }
}
