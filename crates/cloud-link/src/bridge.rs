//! Bridge between in-flight RPCs and the futures handed to callers.
//!
//! Every call is spawned onto the runtime captured at connect time and its
//! result is delivered through a single-assignment [`CallFuture`]. The caller
//! never drives network I/O itself: dropping a `CallFuture` discards the
//! result but lets the call run to completion, which the cache relies on for
//! background refreshes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, TryFutureExt};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};

use crate::error::{Error, Result};

/// The eventual result of a call.
///
/// Resolves exactly once, with either the value or the error. Combinators
/// only transform the pending result and never issue network calls.
#[must_use = "a CallFuture does nothing to the result unless awaited"]
pub struct CallFuture<T> {
    inner: BoxFuture<'static, Result<T>>,
}

impl<T> fmt::Debug for CallFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> CallFuture<T> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        Self {
            inner: future::ready(Ok(value)).boxed(),
        }
    }

    /// A future that is already rejected with `error`.
    pub fn failed(error: Error) -> Self {
        Self {
            inner: future::ready(Err(error)).boxed(),
        }
    }

    /// An unresolved future and the [`Completer`] that settles it.
    pub fn pending() -> (Completer<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = rx.map(|result| result.unwrap_or(Err(Error::Dropped))).boxed();
        (Completer { tx }, Self { inner })
    }

    /// Transform the resolved value.
    pub fn map<U, F>(self, f: F) -> CallFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        CallFuture {
            inner: self.inner.map_ok(f).boxed(),
        }
    }

    /// Transform the resolved value with a step that may itself fail.
    pub fn try_map<U, F>(self, f: F) -> CallFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        CallFuture {
            inner: self
                .inner
                .and_then(|value| future::ready(f(value)))
                .boxed(),
        }
    }

    /// Chain a follow-up call that needs this result.
    pub fn and_then<U, F>(self, f: F) -> CallFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> CallFuture<U> + Send + 'static,
    {
        CallFuture {
            inner: self.inner.and_then(f).boxed(),
        }
    }

    /// Turn a rejection into a value (or a different error).
    pub fn recover<F>(self, f: F) -> CallFuture<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        CallFuture {
            inner: self
                .inner
                .or_else(|error| future::ready(f(error)))
                .boxed(),
        }
    }

    /// Combine with another future; rejects with the first error.
    pub fn zip<U>(self, other: CallFuture<U>) -> CallFuture<(T, U)>
    where
        U: Send + 'static,
    {
        CallFuture {
            inner: future::try_join(self.inner, other.inner).boxed(),
        }
    }
}

impl<T> Future for CallFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// The resolving half of a [`CallFuture`].
///
/// Every method consumes the completer, so a future can only be settled once.
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("abandoned", &self.tx.is_closed())
            .finish()
    }
}

impl<T> Completer<T> {
    /// Resolve with a value. Returns false if the future was dropped.
    pub fn resolve(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Reject with an error. Returns false if the future was dropped.
    pub fn reject(self, error: Error) -> bool {
        self.complete(Err(error))
    }

    /// Settle with a result. Returns false if the future was dropped.
    pub fn complete(self, result: Result<T>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Returns true if nobody is waiting for the result anymore.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dispatches calls onto a bounded set of runtime workers.
#[derive(Clone)]
pub struct Bridge {
    runtime: Handle,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Bridge {
    /// Create a bridge spawning onto `runtime`, running at most
    /// `max_in_flight` calls at a time (at least one).
    pub fn new(runtime: Handle, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// The runtime calls are spawned onto.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Spawn `call` and return a future for its result.
    ///
    /// Returns immediately; the call waits for a free slot on the worker set.
    pub fn dispatch<T, F>(&self, call: F) -> CallFuture<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (completer, future) = CallFuture::pending();
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            // The semaphore is never closed; a failed acquire drops the
            // completer and the caller sees `Error::Dropped`.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let result = call.await;
            if let Err(error) = &result {
                tracing::debug!(%error, "call rejected");
            }
            completer.complete(result);
        });
        future
    }
}
