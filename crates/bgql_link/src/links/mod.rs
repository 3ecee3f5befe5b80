//! Ready-made links built on the core contract.

pub mod context;
pub mod timeout;

pub use context::{set_context, set_context_async, SetContextLink};
pub use timeout::{timeout, TimeoutLink, TIMEOUT_CONTEXT_KEY};
