//! Bridges between [`Observable`] and `futures::Stream`.

use crate::error::{LinkError, LinkResult};
use crate::observable::{Observable, Observer, Subscriber, Subscription};
use crate::result::FetchResult;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A pull-based view of one subscription.
///
/// Yields `Ok` for each `next` event, a final `Err` for an `error` event, and
/// ends after `complete`. Dropping the stream unsubscribes.
pub struct ResultStream {
    receiver: mpsc::UnboundedReceiver<LinkResult<FetchResult>>,
    subscription: Subscription,
    done: bool,
}

impl ResultStream {
    /// Unsubscribes without waiting for the stream to be dropped.
    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
        self.receiver.close();
    }

    /// Checks whether the underlying subscription has closed.
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}

impl Stream for ResultStream {
    type Item = LinkResult<FetchResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    this.done = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

struct ChannelObserver {
    sender: mpsc::UnboundedSender<LinkResult<FetchResult>>,
}

impl Observer for ChannelObserver {
    fn next(&self, result: FetchResult) {
        let _ = self.sender.send(Ok(result));
    }

    fn error(&self, error: LinkError) {
        let _ = self.sender.send(Err(error));
    }

    // The sender is dropped with the observer once the subscription closes,
    // which ends the receiving side.
    fn complete(&self) {}
}

impl Observable {
    /// Subscribes and exposes the events as a `futures::Stream`.
    pub fn into_stream(self) -> ResultStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(ChannelObserver { sender });
        ResultStream {
            receiver,
            subscription,
            done: false,
        }
    }

    /// Drives the stream produced by `factory` on the tokio runtime for each
    /// subscription. The first `Err` item terminates the observable.
    ///
    /// Must be subscribed from within a tokio runtime.
    pub fn from_stream<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = LinkResult<FetchResult>> + Send + 'static,
    {
        Self::new(move |subscriber: Subscriber| {
            let mut stream = Box::pin(factory());
            let cancelled = subscriber.cancelled();
            tokio::spawn(async move {
                tokio::pin!(cancelled);
                loop {
                    tokio::select! {
                        _ = &mut cancelled => break,
                        item = stream.next() => match item {
                            Some(Ok(result)) => subscriber.next(result),
                            Some(Err(error)) => {
                                subscriber.error(error);
                                break;
                            }
                            None => {
                                subscriber.complete();
                                break;
                            }
                        },
                    }
                }
            })
        })
    }
}
