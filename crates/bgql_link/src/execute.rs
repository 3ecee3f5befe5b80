//! Running a link chain against a request.

use crate::error::{LinkError, LinkResult};
use crate::link::{Link, NextLink, SharedLink};
use crate::observable::{Observable, Observer, Subscriber, Subscription, Teardown};
use crate::operation::{GraphQLRequest, Operation};
use crate::result::FetchResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Executes `link` for `request`, returning a cold result stream.
///
/// Each subscription builds a fresh [`Operation`] with its own context and
/// runs the chain again. A request without a query document errors the
/// stream before any link runs. If the last link in the chain calls
/// `forward`, the stream errors with
/// [`ErrorCode::Unterminated`](crate::error::ErrorCode::Unterminated).
pub fn execute(link: impl Link, request: GraphQLRequest) -> Observable {
    let link = SharedLink::new(link);
    Observable::new(move |subscriber: Subscriber| -> Teardown {
        let operation = match Operation::from_request(&request) {
            Ok(operation) => operation,
            Err(error) => {
                warn!(%error, "refusing to execute request");
                subscriber.error(error);
                return Teardown::none();
            }
        };

        debug!(
            operation_name = ?operation.operation_name,
            kind = %operation.kind(),
            "executing operation"
        );

        link.request(operation, terminal_forward())
            .relay_into(&subscriber, |downstream, result| downstream.next(result))
            .into()
    })
}

/// The forward handed to the last link of a chain. Calling it means the
/// chain has no terminating link.
fn terminal_forward() -> NextLink {
    NextLink::new(|operation: Operation| {
        warn!(
            operation_name = ?operation.operation_name,
            "operation forwarded past the last link"
        );
        Observable::error(LinkError::unterminated(operation.operation_name.as_deref()))
    })
}

struct PromiseObserver {
    sender: Mutex<Option<oneshot::Sender<LinkResult<FetchResult>>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl PromiseObserver {
    fn settle(&self, outcome: LinkResult<FetchResult>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl Observer for PromiseObserver {
    fn start(&self, subscription: &Subscription) {
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription.clone());
    }

    fn next(&self, result: FetchResult) {
        if !self.settle(Ok(result)) {
            return;
        }
        trace!("first result received, unsubscribing");
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    fn error(&self, error: LinkError) {
        self.settle(Err(error));
    }

    fn complete(&self) {
        if self.settle(Err(LinkError::no_result())) {
            trace!("stream completed before producing a result");
        }
    }
}

/// Future returned by [`make_promise`].
///
/// Dropping it before it resolves unsubscribes from the stream.
#[must_use = "futures do nothing unless polled; dropping this one cancels the execution"]
pub struct ResultFuture {
    receiver: oneshot::Receiver<LinkResult<FetchResult>>,
    subscription: Subscription,
}

impl Future for ResultFuture {
    type Output = LinkResult<FetchResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(LinkError::cancelled())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResultFuture {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Resolves with the first result of `observable`.
///
/// The stream is unsubscribed as soon as the first `next` arrives, so this
/// is meant for single-shot queries and mutations, not for subscriptions or
/// polling. An `error` before any result rejects with that error; completing
/// without a result rejects with
/// [`ErrorCode::NoResult`](crate::error::ErrorCode::NoResult).
pub fn make_promise(observable: &Observable) -> ResultFuture {
    let (sender, receiver) = oneshot::channel();
    let subscription = observable.subscribe(PromiseObserver {
        sender: Mutex::new(Some(sender)),
        subscription: Mutex::new(None),
    });
    ResultFuture {
        receiver,
        subscription,
    }
}
