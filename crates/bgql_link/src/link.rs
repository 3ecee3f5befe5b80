//! The link contract.
//!
//! A link receives an [`Operation`] and a [`NextLink`] and returns an
//! [`Observable`]. It may forward the operation (possibly transformed) zero,
//! one or several times, and may transform the returned stream. Request
//! failures are never returned directly; they travel on the stream's error
//! channel.
//!
//! # Example
//!
//! ```
//! use bgql_link::link::{Link, LinkExt, NextLink};
//! use bgql_link::observable::Observable;
//! use bgql_link::operation::Operation;
//! use bgql_link::result::FetchResult;
//! use serde_json::json;
//!
//! let auth = |operation: Operation, forward: NextLink| {
//!     operation.context().set("token", "secret");
//!     forward.call(operation)
//! };
//! let terminal = |operation: Operation, _forward: NextLink| {
//!     let token: Option<String> = operation.context().get("token");
//!     Observable::of([FetchResult::data(json!({ "token": token }))])
//! };
//!
//! let chain = auth.concat(terminal);
//! ```

use crate::compose::{Concat, Split};
use crate::observable::Observable;
use crate::operation::Operation;
use std::fmt;
use std::sync::Arc;

/// A unit of request handling.
pub trait Link: Send + Sync + 'static {
    /// Handles `operation`, optionally delegating to `forward`.
    fn request(&self, operation: Operation, forward: NextLink) -> Observable;
}

impl<F> Link for F
where
    F: Fn(Operation, NextLink) -> Observable + Send + Sync + 'static,
{
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        self(operation, forward)
    }
}

/// Type-erased, cheaply cloneable handle to any link.
///
/// Composed links are links too, so a `SharedLink` can wrap an entire chain
/// and be nested inside another one.
#[derive(Clone)]
pub struct SharedLink(Arc<dyn Link>);

impl SharedLink {
    pub fn new(link: impl Link) -> Self {
        Self(Arc::new(link))
    }
}

impl Link for SharedLink {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        self.0.request(operation, forward)
    }
}

impl fmt::Debug for SharedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLink").finish_non_exhaustive()
    }
}

/// The forwarding capability handed to a link.
///
/// Cloning is cheap. Each call invokes the rest of the chain again and
/// returns an independent stream.
#[derive(Clone)]
pub struct NextLink {
    inner: Arc<dyn Fn(Operation) -> Observable + Send + Sync>,
}

impl NextLink {
    pub fn new(f: impl Fn(Operation) -> Observable + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Forwards `operation` to the next link.
    pub fn call(&self, operation: Operation) -> Observable {
        (self.inner)(operation)
    }
}

impl fmt::Debug for NextLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextLink").finish_non_exhaustive()
    }
}

/// Fluent composition for any link.
pub trait LinkExt: Link + Sized {
    /// Runs `self`, forwarding into `next`.
    fn concat(self, next: impl Link) -> Concat {
        crate::compose::concat(self, next)
    }

    /// Runs `self`, then routes forwarded operations to `left` or `right`.
    fn split<P>(self, predicate: P, left: impl Link, right: impl Link) -> Concat
    where
        P: Fn(&Operation) -> bool + Send + Sync + 'static,
    {
        crate::compose::concat(self, Split::new(predicate, left, right))
    }

    /// Erases the concrete type.
    fn boxed(self) -> SharedLink {
        SharedLink::new(self)
    }
}

impl<L: Link> LinkExt for L {}
