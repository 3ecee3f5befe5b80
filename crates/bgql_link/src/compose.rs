//! Composition of links: [`concat`], [`split`], [`from`].
//!
//! Composition is synchronous wiring only. The returned links are ordinary
//! [`Link`]s and can be nested arbitrarily.

use crate::link::{Link, NextLink, SharedLink};
use crate::observable::Observable;
use crate::operation::Operation;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Two links run in sequence. See [`concat`].
#[derive(Clone, Debug)]
pub struct Concat {
    first: SharedLink,
    second: SharedLink,
}

impl Link for Concat {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        let second = self.second.clone();
        let next = NextLink::new(move |operation: Operation| {
            trace!(operation_name = ?operation.operation_name, "forwarding to next link");
            second.request(operation, forward.clone())
        });
        self.first.request(operation, next)
    }
}

/// Chains `first` and `second`: `first` runs with a forward that invokes
/// `second`, which in turn receives the caller's forward.
///
/// `concat(a, concat(b, c))` and `concat(concat(a, b), c)` behave the same.
pub fn concat(first: impl Link, second: impl Link) -> Concat {
    Concat {
        first: SharedLink::new(first),
        second: SharedLink::new(second),
    }
}

type Predicate = dyn Fn(&Operation) -> bool + Send + Sync;

/// Routes each operation to one of two links. See [`split`].
#[derive(Clone)]
pub struct Split {
    predicate: Arc<Predicate>,
    left: SharedLink,
    right: SharedLink,
}

impl Split {
    pub fn new<P>(predicate: P, left: impl Link, right: impl Link) -> Self
    where
        P: Fn(&Operation) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            left: SharedLink::new(left),
            right: SharedLink::new(right),
        }
    }
}

impl fmt::Debug for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Split")
            .field("left", &self.left)
            .field("right", &self.right)
            .finish_non_exhaustive()
    }
}

impl Link for Split {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        if (self.predicate)(&operation) {
            self.left.request(operation, forward)
        } else {
            self.right.request(operation, forward)
        }
    }
}

/// Sends the operation to `left` when `predicate` holds and to `right`
/// otherwise. The predicate runs once per request; both branches receive
/// the split link's own forward.
pub fn split<P>(predicate: P, left: impl Link, right: impl Link) -> Split
where
    P: Fn(&Operation) -> bool + Send + Sync + 'static,
{
    Split::new(predicate, left, right)
}

/// Identity link: forwards the operation unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Link for Passthrough {
    fn request(&self, operation: Operation, forward: NextLink) -> Observable {
        forward.call(operation)
    }
}

pub fn passthrough() -> Passthrough {
    Passthrough
}

/// Terminal link that completes immediately without results.
#[derive(Clone, Copy, Debug, Default)]
pub struct Empty;

impl Link for Empty {
    fn request(&self, _operation: Operation, _forward: NextLink) -> Observable {
        Observable::empty()
    }
}

pub fn empty() -> Empty {
    Empty
}

/// Folds `links` into one link, left to right.
///
/// `from([a, b, c])` is `concat(a, concat(b, c))`, `from([a])` is `a`, and
/// `from([])` is [`passthrough`].
pub fn from(links: impl IntoIterator<Item = SharedLink>) -> SharedLink {
    let links: Vec<SharedLink> = links.into_iter().collect();
    links
        .into_iter()
        .rev()
        .reduce(|rest, link| SharedLink::new(concat(link, rest)))
        .unwrap_or_else(|| SharedLink::new(Passthrough))
}
