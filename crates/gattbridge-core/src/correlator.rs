//! Request correlation over an [`ActionBus`]
//!
//! Turns "issue a command, then wait for the callback that answers it" into
//! futures and streams:
//!
//! - [`Request`]: one-shot, resolves on the first matching event and replays
//!   the result to every clone
//! - [`EventStream`]: long-lived, forwards matching events until an error
//!   event or the consumer drops it
//! - [`SharedStream`]: long-lived and multicast, with the command issued on
//!   the first subscription and stopped when the last one goes away
//!
//! All three subscribe to the bus before the command is issued, so a callback
//! fired synchronously from inside the command is never missed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, Stream, StreamExt};
use tracing::debug;

use crate::bus::{ActionBus, EventReceiver};
use crate::error::{BleError, Result};
use crate::sync::lock;

type Effect = Box<dyn FnOnce() + Send>;

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Side effect that runs at most once no matter how many paths race to it
#[derive(Default)]
struct CancelOnce {
    effect: Mutex<Option<Effect>>,
}

impl CancelOnce {
    fn set(&self, effect: Effect) {
        *lock(&self.effect) = Some(effect);
    }

    fn disarm(&self) {
        lock(&self.effect).take();
    }

    fn fire(&self) {
        // Take before running so the effect never executes under the lock
        let effect = lock(&self.effect).take();
        if let Some(effect) = effect {
            effect();
        }
    }
}

#[derive(Default)]
struct RequestState {
    issued: AtomicBool,
    settled: AtomicBool,
    cancel: CancelOnce,
}

/// Owned by every clone of a [`Request`]; runs the cancel effect when the
/// last clone goes away before the request settled.
struct RequestGuard {
    state: Arc<RequestState>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let issued = self.state.issued.load(Ordering::SeqCst);
        let settled = self.state.settled.load(Ordering::SeqCst);
        if issued && !settled {
            debug!("Request dropped before it resolved, cancelling");
            self.state.cancel.fire();
        }
    }
}

// ----------------------------------------------------------------------------
// One-shot Requests
// ----------------------------------------------------------------------------

/// A correlated one-shot operation.
///
/// The command is issued the first time any clone is polled. Every clone
/// observes the same result; once resolved, new clones get it immediately
/// without issuing again. Dropping every clone before the result arrives runs
/// the cancel effect registered with [`Request::on_cancel`], exactly once.
pub struct Request<T> {
    shared: Shared<BoxFuture<'static, Result<T>>>,
    guard: Arc<RequestGuard>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("issued", &self.guard.state.issued.load(Ordering::SeqCst))
            .field("settled", &self.guard.state.settled.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T> Request<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Correlate a command with the first bus event that answers it.
    ///
    /// `matcher` returns `None` for events that do not belong to this
    /// request and `Some` with the outcome for the one that does.
    pub fn correlate<E, I, M>(bus: &ActionBus<E>, issue: I, mut matcher: M) -> Self
    where
        E: Send + 'static,
        I: FnOnce() + Send + 'static,
        M: FnMut(E) -> Option<Result<T>> + Send + 'static,
    {
        let state = Arc::new(RequestState::default());
        let mut events = bus.subscribe();

        let inner = Arc::clone(&state);
        let future = async move {
            inner.issued.store(true, Ordering::SeqCst);
            issue();

            let result = loop {
                match events.recv().await {
                    Some(event) => {
                        if let Some(result) = matcher(event) {
                            break result;
                        }
                    }
                    None => break Err(BleError::EventBusClosed),
                }
            };

            inner.settled.store(true, Ordering::SeqCst);
            inner.cancel.disarm();
            result
        };

        Self {
            shared: future.boxed().shared(),
            guard: Arc::new(RequestGuard { state }),
        }
    }

    /// A request that is already resolved and has nothing to cancel
    pub fn ready(result: Result<T>) -> Self {
        let state = RequestState::default();
        state.issued.store(true, Ordering::SeqCst);
        state.settled.store(true, Ordering::SeqCst);

        let shared = futures::future::ready(result).boxed().shared();
        // Resolve through a clone so `peek` sees the result and the stored
        // handle can still be polled
        let _ = shared.clone().now_or_never();

        Self {
            shared,
            guard: Arc::new(RequestGuard {
                state: Arc::new(state),
            }),
        }
    }

    /// Register the side effect that undoes the command when the request is
    /// abandoned before it resolved
    pub fn on_cancel<C>(self, cancel: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        if !self.guard.state.settled.load(Ordering::SeqCst) {
            self.guard.state.cancel.set(Box::new(cancel));
        }
        self
    }

    /// The cached result, if the request has already resolved
    pub fn peek(&self) -> Option<Result<T>> {
        self.shared.peek().cloned()
    }
}

impl<T: Clone> Future for Request<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_unpin(cx)
    }
}

// ----------------------------------------------------------------------------
// Long-lived Streams
// ----------------------------------------------------------------------------

/// Decision a stream makes for each bus event
#[derive(Debug)]
pub enum Step<T> {
    /// The event is not for this stream
    Skip,
    /// Forward a value and keep listening
    Yield(T),
    /// Forward an error and end the stream
    Fail(BleError),
    /// End the stream without an error
    Finish,
}

struct Correlated<E, T> {
    events: EventReceiver<E>,
    issue: Option<Effect>,
    step: Box<dyn FnMut(E) -> Step<T> + Send>,
    cancel: CancelOnce,
    started: bool,
    terminated: bool,
}

impl<E, T> Correlated<E, T> {
    fn terminate(&mut self) {
        self.terminated = true;
        self.cancel.disarm();
    }
}

impl<E, T> Stream for Correlated<E, T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.terminated {
            return Poll::Ready(None);
        }
        if !this.started {
            this.started = true;
            if let Some(issue) = this.issue.take() {
                issue();
            }
        }

        loop {
            match futures::ready!(this.events.poll_recv(cx)) {
                Some(event) => match (this.step)(event) {
                    Step::Skip => continue,
                    Step::Yield(value) => return Poll::Ready(Some(Ok(value))),
                    Step::Fail(err) => {
                        this.terminate();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Step::Finish => {
                        this.terminate();
                        return Poll::Ready(None);
                    }
                },
                None => {
                    this.terminate();
                    return Poll::Ready(Some(Err(BleError::EventBusClosed)));
                }
            }
        }
    }
}

impl<E, T> Drop for Correlated<E, T> {
    fn drop(&mut self) {
        if self.started && !self.terminated {
            debug!("Event stream dropped while active, cancelling");
            self.cancel.fire();
        }
    }
}

/// A correlated long-lived operation.
///
/// The bus subscription is taken when the stream is created; the command (if
/// any) is issued on the first poll. The stream ends after the first error.
/// Dropping it while still active runs the cancel effect.
pub struct EventStream<T> {
    inner: BoxStream<'static, Result<T>>,
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// Listen to the bus without issuing any command
    pub fn listen<E, F>(bus: &ActionBus<E>, step: F) -> Self
    where
        E: Send + 'static,
        F: FnMut(E) -> Step<T> + Send + 'static,
    {
        Self::build(bus, None, None, step)
    }

    /// Issue a command on first poll and undo it if the stream is dropped
    /// while active
    pub fn correlate<E, I, C, F>(bus: &ActionBus<E>, issue: I, cancel: C, step: F) -> Self
    where
        E: Send + 'static,
        I: FnOnce() + Send + 'static,
        C: FnOnce() + Send + 'static,
        F: FnMut(E) -> Step<T> + Send + 'static,
    {
        Self::build(bus, Some(Box::new(issue)), Some(Box::new(cancel)), step)
    }

    fn build<E, F>(bus: &ActionBus<E>, issue: Option<Effect>, cancel: Option<Effect>, step: F) -> Self
    where
        E: Send + 'static,
        F: FnMut(E) -> Step<T> + Send + 'static,
    {
        let guard = CancelOnce::default();
        if let Some(cancel) = cancel {
            guard.set(cancel);
        }

        let correlated = Correlated {
            events: bus.subscribe(),
            issue,
            step: Box::new(step),
            cancel: guard,
            started: false,
            terminated: false,
        };

        Self {
            inner: correlated.boxed(),
        }
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

// ----------------------------------------------------------------------------
// Shared Streams
// ----------------------------------------------------------------------------

type Source<T> = Box<dyn Fn() -> BoxStream<'static, T> + Send + Sync>;

struct SharedState<T> {
    subscribers: usize,
    latest: Option<T>,
}

struct SharedInner<T> {
    source: Source<T>,
    start: Box<dyn Fn() + Send + Sync>,
    stop: Box<dyn Fn() + Send + Sync>,
    state: Mutex<SharedState<T>>,
}

impl<T: Clone> SharedInner<T> {
    fn attach(&self) -> (BoxStream<'static, T>, Option<T>) {
        let mut state = lock(&self.state);
        let events = (self.source)();
        state.subscribers += 1;
        if state.subscribers == 1 {
            debug!("First subscriber attached, starting shared operation");
            (self.start)();
        }
        (events, state.latest.clone())
    }

    fn detach(&self) {
        let mut state = lock(&self.state);
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            debug!("Last subscriber detached, stopping shared operation");
            state.latest = None;
            (self.stop)();
        }
    }
}

/// A long-lived operation shared by any number of subscribers.
///
/// The start command runs when the subscriber count goes from zero to one and
/// the stop command when it returns to zero. Subscribers that join while the
/// operation is running first receive the most recent value.
pub struct SharedStream<T> {
    inner: Arc<SharedInner<T>>,
}

impl<T> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SharedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStream").finish_non_exhaustive()
    }
}

impl<T> SharedStream<T>
where
    T: Clone + Send + 'static,
{
    pub fn correlate<E, S, P, F>(bus: &ActionBus<E>, start: S, stop: P, filter: F) -> Self
    where
        E: Send + 'static,
        S: Fn() + Send + Sync + 'static,
        P: Fn() + Send + Sync + 'static,
        F: Fn(E) -> Option<T> + Send + Sync + 'static,
    {
        let bus = bus.clone();
        let filter = Arc::new(filter);
        let source: Source<T> = Box::new(move || {
            let mut events = bus.subscribe();
            let filter = Arc::clone(&filter);
            futures::stream::poll_fn(move |cx| events.poll_recv(cx))
                .filter_map(move |event| futures::future::ready((*filter)(event)))
                .boxed()
        });

        Self {
            inner: Arc::new(SharedInner {
                source,
                start: Box::new(start),
                stop: Box::new(stop),
                state: Mutex::new(SharedState {
                    subscribers: 0,
                    latest: None,
                }),
            }),
        }
    }

    /// Attach a subscriber, starting the operation if it is the first
    pub fn subscribe(&self) -> SharedSubscription<T> {
        let (events, replay) = self.inner.attach();
        SharedSubscription {
            replay,
            events,
            owner: Arc::clone(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.state).subscribers
    }
}

/// One subscriber of a [`SharedStream`]
pub struct SharedSubscription<T: Clone> {
    replay: Option<T>,
    events: BoxStream<'static, T>,
    owner: Arc<SharedInner<T>>,
}

// The replay slot is never pinned
impl<T: Clone> Unpin for SharedSubscription<T> {}

impl<T: Clone> Stream for SharedSubscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if let Some(value) = self.replay.take() {
            return Poll::Ready(Some(value));
        }
        let next = futures::ready!(self.events.poll_next_unpin(cx));
        if let Some(value) = &next {
            lock(&self.owner.state).latest = Some(value.clone());
        }
        Poll::Ready(next)
    }
}

impl<T: Clone> Drop for SharedSubscription<T> {
    fn drop(&mut self) {
        self.owner.detach();
    }
}
