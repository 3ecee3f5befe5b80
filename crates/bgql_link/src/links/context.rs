//! Links that write into the operation context before forwarding.

use crate::context::ContextMap;
use crate::error::LinkResult;
use crate::link::{Link, NextLink};
use crate::observable::{Observable, Subscriber};
use crate::operation::Operation;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type Setter = dyn Fn(&Operation) -> BoxFuture<'static, LinkResult<ContextMap>> + Send + Sync;

/// Merges a computed partial context into the operation, then forwards.
///
/// The merge is visible to every link the operation is forwarded to
/// afterwards, and only within the current execution.
#[derive(Clone)]
pub struct SetContextLink {
    setter: Arc<Setter>,
}

impl std::fmt::Debug for SetContextLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetContextLink").finish_non_exhaustive()
    }
}

impl Link for SetContextLink {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        let setter = Arc::clone(&self.setter);
        Observable::new(move |subscriber: Subscriber| {
            let pending = setter(&operation);
            let operation = operation.clone();
            let forward = forward.clone();
            let downstream = subscriber.clone();
            tokio::spawn(async move {
                match pending.await {
                    Ok(partial) => {
                        operation.set_context(partial);
                        let upstream = forward
                            .call(operation)
                            .relay_into(&downstream, |d, result| d.next(result));
                        downstream.add_teardown(upstream);
                    }
                    Err(error) => downstream.error(error),
                }
            })
        })
    }
}

/// Creates a context-setting link from a synchronous setter.
///
/// Unlike [`set_context_async`], this link forwards in the same call and
/// does not need a tokio runtime.
pub fn set_context<F>(setter: F) -> impl Link
where
    F: Fn(&Operation) -> ContextMap + Send + Sync + 'static,
{
    move |operation: Operation, forward: NextLink| {
        operation.set_context(setter(&operation));
        forward.call(operation)
    }
}

/// Creates a [`SetContextLink`] whose setter is asynchronous, e.g. to fetch
/// a token. A setter error terminates the stream without forwarding.
///
/// Must be subscribed from within a tokio runtime.
pub fn set_context_async<F, Fut>(setter: F) -> SetContextLink
where
    F: Fn(&Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LinkResult<ContextMap>> + Send + 'static,
{
    SetContextLink {
        setter: Arc::new(
            move |operation: &Operation| -> BoxFuture<'static, LinkResult<ContextMap>> {
                Box::pin(setter(operation))
            },
        ),
    }
}
