//! Cold, push-based result streams.
//!
//! An [`Observable`] does no work until it is subscribed. Every call to
//! [`Observable::subscribe`] runs the producer again and yields an
//! independent [`Subscription`]. A subscription receives zero or more
//! `next` events followed by at most one terminal `error` or `complete`.
//!
//! Once a subscription is closed (by a terminal event or by
//! [`Subscription::unsubscribe`]) no further events reach its observer and
//! every registered [`Teardown`] runs exactly once.
//!
//! Events of one subscription reach its observer one call at a time and in
//! emission order, even when producers emit from several threads.
//!
//! # Example
//!
//! ```
//! use bgql_link::observable::{observer, Observable};
//! use bgql_link::result::FetchResult;
//! use serde_json::json;
//!
//! let results = Observable::new(|subscriber| {
//!     subscriber.next(FetchResult::data(json!({"x": 1})));
//!     subscriber.complete();
//! });
//!
//! let subscription = results.subscribe(observer().on_next(|result| {
//!     assert_eq!(result.data, Some(json!({"x": 1})));
//! }));
//! assert!(subscription.is_closed());
//! ```

use crate::error::{LinkError, LinkResult};
use crate::result::FetchResult;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Receives the events of one subscription.
pub trait Observer: Send + Sync + 'static {
    /// Called with the subscription handle before the producer runs.
    fn start(&self, _subscription: &Subscription) {}

    fn next(&self, result: FetchResult);

    fn error(&self, error: LinkError);

    fn complete(&self);
}

type NextFn = Box<dyn Fn(FetchResult) + Send + Sync>;
type ErrorFn = Box<dyn Fn(LinkError) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// An [`Observer`] assembled from closures. See [`observer`].
pub struct FnObserver {
    next: NextFn,
    error: ErrorFn,
    complete: CompleteFn,
}

/// Starts building a closure-based observer. Unset callbacks ignore their
/// event.
pub fn observer() -> FnObserver {
    FnObserver {
        next: Box::new(|_| {}),
        error: Box::new(|error| debug!(%error, "unhandled stream error")),
        complete: Box::new(|| {}),
    }
}

impl FnObserver {
    pub fn on_next(mut self, f: impl Fn(FetchResult) + Send + Sync + 'static) -> Self {
        self.next = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(LinkError) + Send + Sync + 'static) -> Self {
        self.error = Box::new(f);
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Box::new(f);
        self
    }
}

impl Observer for FnObserver {
    fn next(&self, result: FetchResult) {
        (self.next)(result)
    }

    fn error(&self, error: LinkError) {
        (self.error)(error)
    }

    fn complete(&self) {
        (self.complete)()
    }
}

/// Cleanup work run once when a subscription closes.
#[derive(Default)]
pub struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    fn run(self) {
        if let Some(f) = self.0 {
            f();
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Teardown").field(&self.0.is_some()).finish()
    }
}

impl From<()> for Teardown {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Self::new(move || subscription.unsubscribe())
    }
}

impl<T: Send + 'static> From<tokio::task::JoinHandle<T>> for Teardown {
    fn from(handle: tokio::task::JoinHandle<T>) -> Self {
        Self::new(move || handle.abort())
    }
}

impl From<CancellationToken> for Teardown {
    fn from(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }
}

enum Signal {
    Next(FetchResult),
    Error(LinkError),
    Complete,
}

/// Events waiting to reach the observer. At most one thread drains the
/// queue at a time, so the observer never sees overlapping calls.
#[derive(Default)]
struct Delivery {
    queue: VecDeque<Signal>,
    drainer: Option<ThreadId>,
}

struct Shared {
    closed: AtomicBool,
    observer: Mutex<Option<Arc<dyn Observer>>>,
    delivery: Mutex<Delivery>,
    drained: Condvar,
    teardowns: Mutex<Vec<Teardown>>,
    token: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(observer: Arc<dyn Observer>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            observer: Mutex::new(Some(observer)),
            delivery: Mutex::new(Delivery::default()),
            drained: Condvar::new(),
            teardowns: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn observer(&self) -> Option<Arc<dyn Observer>> {
        lock(&self.observer).clone()
    }

    fn take_observer(&self) -> Option<Arc<dyn Observer>> {
        lock(&self.observer).take()
    }

    fn add_teardown(&self, teardown: Teardown) {
        let mut teardowns = lock(&self.teardowns);
        if self.is_closed() {
            drop(teardowns);
            teardown.run();
        } else {
            teardowns.push(teardown);
        }
    }

    fn cleanup(&self) {
        self.token.cancel();
        let teardowns = std::mem::take(&mut *lock(&self.teardowns));
        for teardown in teardowns {
            teardown.run();
        }
    }

    /// Queues `signal` and drains the queue unless another call is already
    /// draining it. A terminal signal closes the subscription right away,
    /// so nothing queued after it is accepted.
    fn push(&self, signal: Signal) {
        let mut delivery = lock(&self.delivery);
        if self.is_closed() {
            match &signal {
                Signal::Next(_) => trace!("dropping next event on closed subscription"),
                Signal::Error(error) => {
                    trace!(%error, "dropping error event on closed subscription");
                }
                Signal::Complete => trace!("dropping complete event on closed subscription"),
            }
            return;
        }
        if !matches!(signal, Signal::Next(_)) {
            self.closed.store(true, Ordering::Release);
        }
        delivery.queue.push_back(signal);
        if delivery.drainer.is_some() {
            return;
        }
        delivery.drainer = Some(thread::current().id());
        drop(delivery);
        self.drain();
    }

    fn drain(&self) {
        let _release = DrainGuard(self);
        loop {
            let signal = {
                let mut delivery = lock(&self.delivery);
                match delivery.queue.pop_front() {
                    Some(signal) => signal,
                    None => {
                        delivery.drainer = None;
                        self.drained.notify_all();
                        return;
                    }
                }
            };
            match signal {
                Signal::Next(result) => {
                    if let Some(observer) = self.observer() {
                        observer.next(result);
                    }
                }
                Signal::Error(error) => {
                    if let Some(observer) = self.take_observer() {
                        observer.error(error);
                    }
                    self.cleanup();
                }
                Signal::Complete => {
                    if let Some(observer) = self.take_observer() {
                        observer.complete();
                    }
                    self.cleanup();
                }
            }
        }
    }

    /// Closes the subscription and drops pending events. A delivery already
    /// running on another thread is waited for, so the observer sees nothing
    /// once this returns. Calls from inside a delivery do not wait.
    fn unsubscribe(&self) {
        let mut delivery = lock(&self.delivery);
        self.closed.store(true, Ordering::Release);
        delivery.queue.clear();
        let observer = self.take_observer();

        let current = thread::current().id();
        while delivery.drainer.is_some_and(|drainer| drainer != current) {
            delivery = self
                .drained
                .wait(delivery)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(delivery);

        drop(observer);
        self.cleanup();
    }
}

/// Releases the drainer slot if an observer callback panics.
struct DrainGuard<'a>(&'a Shared);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut delivery = lock(&self.0.delivery);
        if delivery.drainer == Some(thread::current().id()) {
            delivery.drainer = None;
            self.0.drained.notify_all();
        }
    }
}

/// Producer-side handle used to emit events into one subscription.
///
/// Events emitted after the subscription closed are dropped.
#[derive(Clone)]
pub struct Subscriber {
    shared: Arc<Shared>,
}

impl Subscriber {
    pub fn next(&self, result: FetchResult) {
        self.shared.push(Signal::Next(result));
    }

    pub fn error(&self, error: LinkError) {
        self.shared.push(Signal::Error(error));
    }

    pub fn complete(&self) {
        self.shared.push(Signal::Complete);
    }

    /// Emits `Ok` as `next` and `Err` as `error`.
    pub fn emit(&self, result: LinkResult<FetchResult>) {
        match result {
            Ok(result) => self.next(result),
            Err(error) => self.error(error),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the subscription closes for any reason.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.shared.token.clone().cancelled_owned()
    }

    /// Returns a token cancelled when the subscription closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Registers extra cleanup work. Runs immediately if already closed.
    pub fn add_teardown(&self, teardown: impl Into<Teardown>) {
        self.shared.add_teardown(teardown.into());
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer-side handle of one subscription.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// Stops event delivery and runs teardown work. Idempotent.
    ///
    /// If another thread is inside an observer callback for this
    /// subscription, waits for that callback to return.
    pub fn unsubscribe(&self) {
        self.shared.unsubscribe();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Producer = dyn Fn(Subscriber) -> Teardown + Send + Sync;

/// A cold stream of [`FetchResult`]s.
#[derive(Clone)]
pub struct Observable {
    producer: Arc<Producer>,
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

impl Observable {
    /// Creates an observable from a producer run once per subscription.
    ///
    /// The producer may return anything convertible into a [`Teardown`]:
    /// `()`, a [`Subscription`], a tokio `JoinHandle` or a
    /// `CancellationToken`.
    pub fn new<F, T>(producer: F) -> Self
    where
        F: Fn(Subscriber) -> T + Send + Sync + 'static,
        T: Into<Teardown>,
    {
        Self {
            producer: Arc::new(move |subscriber| producer(subscriber).into()),
        }
    }

    /// Emits each result in order, then completes.
    pub fn of(results: impl IntoIterator<Item = FetchResult>) -> Self {
        let results: Arc<[FetchResult]> = results.into_iter().collect();
        Self::new(move |subscriber| {
            for result in results.iter() {
                if subscriber.is_closed() {
                    return;
                }
                subscriber.next(result.clone());
            }
            subscriber.complete();
        })
    }

    /// Completes immediately without emitting.
    pub fn empty() -> Self {
        Self::new(|subscriber| subscriber.complete())
    }

    /// Errors immediately.
    pub fn error(error: LinkError) -> Self {
        Self::new(move |subscriber| subscriber.error(error.clone()))
    }

    /// Runs the future produced by `factory` on the tokio runtime for each
    /// subscription, emitting its outcome. Unsubscribing aborts the task.
    ///
    /// Must be subscribed from within a tokio runtime.
    pub fn from_future<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LinkResult<FetchResult>> + Send + 'static,
    {
        Self::new(move |subscriber: Subscriber| {
            let future = factory();
            tokio::spawn(async move {
                match future.await {
                    Ok(result) => {
                        subscriber.next(result);
                        subscriber.complete();
                    }
                    Err(error) => subscriber.error(error),
                }
            })
        })
    }

    /// Subscribes an observer, running the producer.
    pub fn subscribe(&self, observer: impl Observer) -> Subscription {
        let observer: Arc<dyn Observer> = Arc::new(observer);
        let shared = Arc::new(Shared::new(Arc::clone(&observer)));
        let subscription = Subscription {
            shared: Arc::clone(&shared),
        };

        observer.start(&subscription);
        drop(observer);
        if shared.is_closed() {
            return subscription;
        }

        let teardown = (self.producer)(Subscriber {
            shared: Arc::clone(&shared),
        });
        shared.add_teardown(teardown);
        subscription
    }

    /// Subscribes and relays every event into `downstream`, returning the
    /// upstream subscription.
    pub(crate) fn relay_into(
        &self,
        downstream: &Subscriber,
        on_next: impl Fn(&Subscriber, FetchResult) + Send + Sync + 'static,
    ) -> Subscription {
        let next = downstream.clone();
        let error = downstream.clone();
        let complete = downstream.clone();
        self.subscribe(
            observer()
                .on_next(move |result| on_next(&next, result))
                .on_error(move |e| error.error(e))
                .on_complete(move || complete.complete()),
        )
    }

    /// Transforms each result.
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(FetchResult) -> FetchResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |downstream: Subscriber| {
            let f = Arc::clone(&f);
            self.relay_into(&downstream, move |d, result| d.next(f(result)))
        })
    }

    /// Drops results for which `predicate` is false.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&FetchResult) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::new(move |downstream: Subscriber| {
            let predicate = Arc::clone(&predicate);
            self.relay_into(&downstream, move |d, result| {
                if predicate(&result) {
                    d.next(result);
                }
            })
        })
    }

    /// Replaces a terminal error with the stream returned by `handler`.
    ///
    /// Results already emitted stay emitted; the replacement continues the
    /// same subscription.
    pub fn catch_error<F>(self, handler: F) -> Self
    where
        F: Fn(LinkError) -> Observable + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(move |downstream: Subscriber| {
            let handler = Arc::clone(&handler);
            let next = downstream.clone();
            let complete = downstream.clone();
            let recover = downstream.clone();
            self.subscribe(
                observer()
                    .on_next(move |result| next.next(result))
                    .on_error(move |error| {
                        let replacement = handler(error);
                        let subscription =
                            replacement.relay_into(&recover, |d, result| d.next(result));
                        recover.add_teardown(subscription);
                    })
                    .on_complete(move || complete.complete()),
            )
        })
    }

    /// Interleaves several streams in arrival order.
    ///
    /// Completes after every input completed; the first error closes the
    /// merged stream and unsubscribes the remaining inputs.
    pub fn merge(observables: impl IntoIterator<Item = Observable>) -> Self {
        let observables: Arc<[Observable]> = observables.into_iter().collect();
        Self::new(move |downstream: Subscriber| {
            if observables.is_empty() {
                downstream.complete();
                return;
            }
            let remaining = Arc::new(AtomicUsize::new(observables.len()));
            for source in observables.iter() {
                if downstream.is_closed() {
                    break;
                }
                let next = downstream.clone();
                let error = downstream.clone();
                let complete = downstream.clone();
                let remaining = Arc::clone(&remaining);
                let subscription = source.subscribe(
                    observer()
                        .on_next(move |result| next.next(result))
                        .on_error(move |e| error.error(e))
                        .on_complete(move || {
                            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                                complete.complete();
                            }
                        }),
                );
                downstream.add_teardown(subscription);
            }
        })
    }

    /// Resolves with the first result. See [`make_promise`](crate::execute::make_promise).
    pub fn first(&self) -> crate::execute::ResultFuture {
        crate::execute::make_promise(self)
    }
}
