//! Lifecycle of server-streaming subscriptions.
//!
//! A [`CallHandle`] owns one streaming call. Events are pushed to an
//! [`Observer`] from a driver task on the runtime; [`event_stream`] adapts the
//! observer side into an async [`Stream`] for callers that prefer pulling.
//!
//! ```text
//! Created ──open──> Active ──server ends──> Completed
//!    │                │ └────error────────> Failed
//!    │                └──────cancel()─────> Canceled
//!    └──cancel()/open rejected──> Canceled / Failed
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::error::{Error, Result};

/// State of a streaming call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Subscribe requested, stream not yet open
    Created,
    /// Stream open, events flowing
    Active,
    /// Canceled by the caller
    Canceled,
    /// The controller ended the stream
    Completed,
    /// The stream failed
    Failed,
}

impl CallState {
    /// Returns true for states no call ever leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Canceled | CallState::Completed | CallState::Failed
        )
    }
}

/// Receiver of subscription events.
///
/// Callbacks run on the subscription's driver task and must not block.
/// `on_next` is only called while the call is active; `on_error` and
/// `on_completed` are called at most once and nothing follows them. A
/// canceled call gets neither.
pub trait Observer<T>: Send + 'static {
    /// A new event arrived.
    fn on_next(&mut self, event: T);

    /// The stream failed.
    fn on_error(&mut self, error: Error) {
        tracing::debug!(%error, "subscription failed");
    }

    /// The controller ended the stream.
    fn on_completed(&mut self) {}
}

impl<T, O: Observer<T> + ?Sized> Observer<T> for Box<O> {
    fn on_next(&mut self, event: T) {
        (**self).on_next(event)
    }

    fn on_error(&mut self, error: Error) {
        (**self).on_error(error)
    }

    fn on_completed(&mut self) {
        (**self).on_completed()
    }
}

/// Observer built from a closure handling events only.
pub struct FnObserver<F>(F);

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObserver").finish_non_exhaustive()
    }
}

/// Wrap a closure into an [`Observer`].
pub fn observer_fn<T, F>(f: F) -> FnObserver<F>
where
    F: FnMut(T) + Send + 'static,
{
    FnObserver(f)
}

impl<T, F> Observer<T> for FnObserver<F>
where
    F: FnMut(T) + Send + 'static,
{
    fn on_next(&mut self, event: T) {
        (self.0)(event)
    }
}

/// Observer converting events before handing them on.
pub struct MapObserver<O, F, T> {
    inner: O,
    map: F,
    _target: PhantomData<fn() -> T>,
}

impl<O, F, T> fmt::Debug for MapObserver<O, F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapObserver").finish_non_exhaustive()
    }
}

/// Convert raw events with `map` before they reach `inner`.
///
/// Events `map` returns `None` for are dropped.
pub fn map_observer<U, T, O, F>(inner: O, map: F) -> MapObserver<O, F, T>
where
    O: Observer<T>,
    F: FnMut(U) -> Option<T> + Send + 'static,
{
    MapObserver {
        inner,
        map,
        _target: PhantomData,
    }
}

impl<U, T, O, F> Observer<U> for MapObserver<O, F, T>
where
    T: 'static,
    O: Observer<T>,
    F: FnMut(U) -> Option<T> + Send + 'static,
{
    fn on_next(&mut self, event: U) {
        if let Some(event) = (self.map)(event) {
            self.inner.on_next(event);
        }
    }

    fn on_error(&mut self, error: Error) {
        self.inner.on_error(error)
    }

    fn on_completed(&mut self) {
        self.inner.on_completed()
    }
}

/// Observer forwarding events into an [`EventStream`].
pub struct StreamObserver<T> {
    tx: Option<mpsc::UnboundedSender<Result<T>>>,
}

impl<T> fmt::Debug for StreamObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamObserver")
            .field("open", &self.tx.is_some())
            .finish()
    }
}

impl<T: Send + 'static> Observer<T> for StreamObserver<T> {
    fn on_next(&mut self, event: T) {
        if let Some(tx) = &self.tx {
            // The reader may be gone; events are dropped then.
            let _ = tx.send(Ok(event));
        }
    }

    fn on_error(&mut self, error: Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    fn on_completed(&mut self) {
        self.tx = None;
    }
}

/// Pull side of a subscription.
///
/// Yields events, then an error if the stream failed, then ends. Also ends
/// when the call is canceled.
pub struct EventStream<T> {
    inner: UnboundedReceiverStream<Result<T>>,
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create a connected observer/stream pair.
///
/// The buffer is unbounded so the driver never waits on a slow reader.
pub fn event_stream<T>() -> (StreamObserver<T>, EventStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamObserver { tx: Some(tx) },
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        },
    )
}

struct Shared {
    method: &'static str,
    state: watch::Sender<CallState>,
    token: CancellationToken,
}

impl Shared {
    fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Move from `from` to `to`; false if the call was elsewhere.
    fn transition(&self, from: CallState, to: CallState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(method = self.method, ?from, ?to, "subscription state changed");
        }
        moved
    }
}

/// Handle owning one streaming call.
///
/// Dropping the handle does not cancel the call; use [`CallHandle::cancel`].
#[must_use = "the subscription can only be canceled through its handle"]
#[derive(Clone)]
pub struct CallHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("method", &self.shared.method)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl CallHandle {
    /// Open a streaming call on `runtime` and feed its events to `observer`.
    ///
    /// Returns immediately; `open` is polled by the driver task.
    pub fn spawn<T, S, F, O>(runtime: &Handle, method: &'static str, open: F, observer: O) -> Self
    where
        T: Send + 'static,
        S: Stream<Item = Result<T, Status>> + Send + Unpin + 'static,
        F: Future<Output = Result<S, Status>> + Send + 'static,
        O: Observer<T>,
    {
        let (state, _) = watch::channel(CallState::Created);
        let shared = Arc::new(Shared {
            method,
            state,
            token: CancellationToken::new(),
        });
        runtime.spawn(drive(Arc::clone(&shared), open, observer));
        Self { shared }
    }

    /// Cancel the call and stop the underlying stream.
    ///
    /// Cancellation is cooperative: an event whose delivery already started
    /// may still reach the observer, which should ignore it. Calling this on
    /// a finished call does nothing.
    pub fn cancel(&self) {
        let canceled = self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = CallState::Canceled;
                true
            }
        });
        if canceled {
            tracing::debug!(method = self.shared.method, "subscription canceled");
        }
        self.shared.token.cancel();
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        self.shared.state()
    }

    /// Returns true once the call reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// RPC method this handle streams from.
    pub fn method(&self) -> &'static str {
        self.shared.method
    }

    /// Wait until the call reaches a terminal state and return it.
    pub async fn closed(&self) -> CallState {
        let mut rx = self.shared.state.subscribe();
        match rx.wait_for(CallState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

async fn drive<T, S, F, O>(shared: Arc<Shared>, open: F, mut observer: O)
where
    S: Stream<Item = Result<T, Status>> + Unpin,
    F: Future<Output = Result<S, Status>>,
    O: Observer<T>,
{
    let opened = tokio::select! {
        biased;
        _ = shared.token.cancelled() => return,
        opened = open => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(status) => {
            if shared.transition(CallState::Created, CallState::Failed) {
                observer.on_error(Error::Stream(status));
            }
            return;
        }
    };

    if !shared.transition(CallState::Created, CallState::Active) {
        return;
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                if shared.state() != CallState::Active {
                    break;
                }
                observer.on_next(event);
            }
            Some(Err(status)) => {
                if shared.transition(CallState::Active, CallState::Failed) {
                    observer.on_error(Error::Stream(status));
                }
                break;
            }
            None => {
                if shared.transition(CallState::Active, CallState::Completed) {
                    observer.on_completed();
                }
                break;
            }
        }
    }
    // Dropping the stream here resets it on the transport.
}
