//! Bounding how long a chain may take to produce its first result.

use crate::error::LinkError;
use crate::link::{Link, NextLink};
use crate::observable::{Observable, Subscriber};
use crate::operation::{Operation, OperationKind};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Context entry (milliseconds) overriding the link's default timeout for
/// one operation.
pub const TIMEOUT_CONTEXT_KEY: &str = "timeout";

/// Errors the stream with [`ErrorCode::Timeout`](crate::error::ErrorCode::Timeout)
/// when the rest of the chain produces no result in time.
///
/// The timer stops at the first result, so long-lived subscriptions are
/// only bounded until their first event. When it fires, the forwarded
/// stream is unsubscribed, which cancels the work of the terminal link.
///
/// Must be subscribed from within a tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLink {
    duration: Duration,
    include_subscriptions: bool,
}

impl TimeoutLink {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            include_subscriptions: true,
        }
    }

    /// Exempts subscription operations from the timer.
    pub fn skip_subscriptions(mut self) -> Self {
        self.include_subscriptions = false;
        self
    }

    fn duration_for(&self, operation: &Operation) -> Duration {
        operation
            .context()
            .get::<u64>(TIMEOUT_CONTEXT_KEY)
            .map(Duration::from_millis)
            .unwrap_or(self.duration)
    }
}

impl Link for TimeoutLink {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        if !self.include_subscriptions && operation.kind() == OperationKind::Subscription {
            return forward.call(operation);
        }

        let duration = self.duration_for(&operation);
        let operation_name = operation.operation_name.clone();
        let inner = forward.call(operation);

        Observable::new(move |subscriber: Subscriber| {
            let timer = CancellationToken::new();
            subscriber.add_teardown(timer.clone());

            let stop_timer = timer.clone();
            let upstream = inner.relay_into(&subscriber, move |downstream, result| {
                stop_timer.cancel();
                downstream.next(result);
            });
            if subscriber.is_closed() || timer.is_cancelled() {
                return upstream;
            }

            let expired = subscriber.clone();
            let operation_name = operation_name.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {
                        debug!(?operation_name, ?duration, "operation timed out");
                        expired.error(LinkError::timeout());
                    }
                }
            });
            upstream
        })
    }
}

/// Creates a [`TimeoutLink`].
pub fn timeout(duration: Duration) -> TimeoutLink {
    TimeoutLink::new(duration)
}
