//! Better GraphQL Link
//!
//! A composable pipeline for executing GraphQL operations. A request flows
//! through a chain of [`Link`]s, each of which may inspect or rewrite the
//! [`Operation`], delegate to the next link, and transform the resulting
//! stream of [`FetchResult`]s. The last link talks to the transport.
//!
//! # Composing a chain
//!
//! ```ignore
//! use bgql_link::{execute, from, split, GraphQLRequest, LinkExt, OperationKind};
//! use bgql_link::links::{set_context, timeout};
//!
//! let chain = from([
//!     set_context(|_| auth_headers()).boxed(),
//!     timeout(Duration::from_secs(10)).boxed(),
//!     split(
//!         |op| op.kind() == OperationKind::Subscription,
//!         websocket_transport,
//!         http_transport,
//!     )
//!     .boxed(),
//! ]);
//!
//! let result = execute(chain, GraphQLRequest::new("{ viewer { id } }"))
//!     .first()
//!     .await?;
//! ```
//!
//! Results are delivered through a cold [`Observable`]: nothing runs until
//! it is subscribed, and every subscription runs the chain again with a
//! fresh operation context. Consume it with an [`Observer`], as a
//! `futures::Stream` via [`Observable::into_stream`], or as a single-shot
//! future via [`make_promise`].

pub mod client;
pub mod compose;
pub mod context;
pub mod error;
pub mod execute;
pub mod link;
pub mod links;
pub mod observable;
pub mod operation;
pub mod result;
pub mod stream;

// Re-exports
pub use client::{ClientConfig, LinkClient};
pub use compose::{concat, empty, from, passthrough, split};
pub use context::{Context, ContextMap};
pub use error::{ErrorCode, LinkError, LinkResult};
pub use execute::{execute, make_promise, ResultFuture};
pub use link::{Link, LinkExt, NextLink, SharedLink};
pub use observable::{observer, Observable, Observer, Subscriber, Subscription, Teardown};
pub use operation::{Document, GraphQLRequest, Operation, OperationKind};
pub use result::{FetchResult, GraphQLError};
pub use stream::ResultStream;
