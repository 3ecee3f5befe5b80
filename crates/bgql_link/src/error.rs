//! Typed errors for the terminal `error` channel of a result stream.
//!
//! GraphQL-level errors never use this type; they travel inside
//! [`FetchResult::errors`](crate::result::FetchResult::errors) on a `next` event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Typed error codes carried by [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Transport errors raised by terminal links
    NetworkError,
    Timeout,
    ConnectionRefused,
    HttpError,
    InvalidResponse,

    // GraphQL errors surfaced by typed helpers
    ExecutionError,
    NoData,

    // Chain errors
    ValidationError,
    Unterminated,
    NoResult,
    Cancelled,

    // Serialization errors
    SerializeError,
    DeserializeError,

    InternalError,

    // Escape hatch for user links
    Custom,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::HttpError => "HTTP_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::NoData => "NO_DATA",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unterminated => "UNTERMINATED",
            Self::NoResult => "NO_RESULT",
            Self::Cancelled => "CANCELLED",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Custom => "CUSTOM",
        }
    }

    /// Returns true if a link may sensibly retry after this error.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::Timeout | Self::ConnectionRefused
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error delivered through the terminal `error` event of a stream.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct LinkError {
    /// Typed error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Underlying error, if this one wraps another.
    #[source]
    pub source: Option<Box<LinkError>>,
    /// Extension data for debugging.
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl LinkError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            extensions: None,
        }
    }

    /// Adds a source error.
    pub fn with_source(mut self, source: LinkError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    /// Creates a timeout error.
    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Request timed out")
    }

    /// Creates an error for a non-success HTTP status, keeping the status
    /// in the `status` extension.
    pub fn http_status(status: u16) -> Self {
        Self::new(ErrorCode::HttpError, format!("HTTP error: status {status}"))
            .with_extension("status", status)
    }

    /// Creates an error for a response body that is not a GraphQL response.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidResponse, message)
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Error raised when the last link of a chain calls `forward`.
    pub fn unterminated(operation_name: Option<&str>) -> Self {
        let message = match operation_name {
            Some(name) => format!(
                "Operation `{name}` was forwarded past the end of the link chain; \
                 the chain has no terminating link"
            ),
            None => "Operation was forwarded past the end of the link chain; \
                     the chain has no terminating link"
                .to_string(),
        };
        Self::new(ErrorCode::Unterminated, message)
    }

    /// Error raised when a stream completes without emitting a result.
    pub fn no_result() -> Self {
        Self::new(ErrorCode::NoResult, "Stream completed without producing a result")
    }

    /// Error raised when a consumer walks away before a result arrived.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Subscription was cancelled")
    }

    /// Creates a serialization error.
    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    /// Creates a deserialization error.
    pub fn deserialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeserializeError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Serialize for LinkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("LinkError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

impl From<std::io::Error> for LinkError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match error.kind() {
            ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
            ErrorKind::TimedOut => ErrorCode::Timeout,
            _ => ErrorCode::NetworkError,
        };
        Self::new(code, format!("Connection failed: {error}"))
    }
}

/// Type alias for link results.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Result extension for mapping foreign errors into [`LinkError`].
pub trait ResultExt<T> {
    /// Maps the error to a [`LinkError`] with the given code.
    fn map_link_err(self, code: ErrorCode) -> LinkResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_link_err(self, code: ErrorCode) -> LinkResult<T> {
        self.map_err(|e| LinkError::new(code, e.to_string()))
    }
}
