//! Application-facing client over a link chain.
//!
//! Holds a composed link plus defaults (timeout, headers, context) and
//! offers a builder for one-off operations.
//!
//! ```ignore
//! use bgql_link::client::{ClientConfig, LinkClient};
//!
//! let client = LinkClient::with_config(
//!     transport,
//!     ClientConfig::new()
//!         .timeout(Duration::from_secs(10))
//!         .header("Authorization", "Bearer token"),
//! );
//!
//! let user: GetUserData = client
//!     .query("query GetUser($id: ID!) { user(id: $id) { id name } }")
//!     .variable("id", "1")
//!     .data()
//!     .await?;
//! ```

use crate::compose::concat;
use crate::context::ContextMap;
use crate::error::{ErrorCode, LinkError, LinkResult};
use crate::execute::{execute, make_promise, ResultFuture};
use crate::link::{Link, SharedLink};
use crate::links::TimeoutLink;
use crate::observable::Observable;
use crate::operation::{Document, GraphQLRequest};
use crate::stream::ResultStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Context entry holding request headers as a JSON object. Transport links
/// read it when building the wire request.
pub const HEADERS_CONTEXT_KEY: &str = "headers";

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Time allowed for the first result of each operation.
    pub timeout: Option<Duration>,
    /// Default headers, merged under [`HEADERS_CONTEXT_KEY`].
    pub headers: HashMap<String, String>,
    /// Default context entries for every operation.
    pub context: ContextMap,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a default header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Adds a default context entry.
    pub fn context_entry(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

/// Executes operations through a fixed link chain.
#[derive(Debug, Clone)]
pub struct LinkClient {
    config: ClientConfig,
    link: SharedLink,
}

impl LinkClient {
    /// Creates a client with default configuration.
    pub fn new(link: impl Link) -> Self {
        Self::with_config(link, ClientConfig::default())
    }

    /// Creates a client with configuration. A configured timeout puts a
    /// [`TimeoutLink`] in front of `link`.
    pub fn with_config(link: impl Link, config: ClientConfig) -> Self {
        let link = match config.timeout {
            Some(timeout) => SharedLink::new(concat(TimeoutLink::new(timeout), link)),
            None => SharedLink::new(link),
        };
        Self { config, link }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the composed chain, including any client-added links.
    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    /// Starts building a query.
    pub fn query(&self, document: impl Into<Document>) -> OperationBuilder {
        OperationBuilder {
            client: self.clone(),
            request: GraphQLRequest::new(document),
        }
    }

    /// Starts building a mutation.
    pub fn mutate(&self, document: impl Into<Document>) -> OperationBuilder {
        self.query(document)
    }

    /// Executes `request` with the client defaults applied. Entries set on
    /// the request win over defaults.
    pub fn execute(&self, mut request: GraphQLRequest) -> Observable {
        let mut context = self.config.context.clone();
        let mut headers = header_map(&self.config.headers);
        for (key, value) in std::mem::take(&mut request.context) {
            match value {
                serde_json::Value::Object(extra) if key == HEADERS_CONTEXT_KEY => {
                    headers.extend(extra)
                }
                value => {
                    context.insert(key, value);
                }
            }
        }
        if !headers.is_empty() {
            context.insert(
                HEADERS_CONTEXT_KEY.to_string(),
                serde_json::Value::Object(headers),
            );
        }
        request.context = context;
        execute(self.link.clone(), request)
    }
}

fn header_map(headers: &HashMap<String, String>) -> serde_json::Map<String, serde_json::Value> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect()
}

/// Builder for one operation. See [`LinkClient::query`].
pub struct OperationBuilder {
    client: LinkClient,
    request: GraphQLRequest,
}

impl OperationBuilder {
    /// Sets the variables.
    pub fn variables<V: Serialize>(mut self, variables: V) -> Self {
        self.request = self.request.variables(variables);
        self
    }

    /// Sets a single variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.request = self.request.variable(name, value);
        self
    }

    /// Sets the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.request = self.request.operation_name(name);
        self
    }

    /// Sets an extension entry.
    pub fn extension(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.request = self.request.extension(name, value);
        self
    }

    /// Sets an initial context entry.
    pub fn context_entry(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.request = self.request.context_entry(name, value);
        self
    }

    /// Adds a header for this operation only.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let headers = self
            .request
            .context
            .entry(HEADERS_CONTEXT_KEY)
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        if let serde_json::Value::Object(headers) = headers {
            headers.insert(key.into(), serde_json::Value::String(value.into()));
        }
        self
    }

    /// Returns the request as built so far.
    pub fn request(&self) -> &GraphQLRequest {
        &self.request
    }

    /// Returns the cold result stream.
    pub fn observe(self) -> Observable {
        self.client.execute(self.request)
    }

    /// Subscribes and returns a `futures::Stream` of results.
    pub fn stream(self) -> ResultStream {
        self.observe().into_stream()
    }

    /// Resolves with the first result.
    pub fn first(self) -> ResultFuture {
        make_promise(&self.observe())
    }

    /// Resolves with the first result's data deserialized into `T`.
    ///
    /// GraphQL errors in that result are reported as
    /// [`ErrorCode::ExecutionError`], carrying the first error's message.
    pub async fn data<T: DeserializeOwned>(self) -> LinkResult<T> {
        let result = self.first().await?;

        if let Some(error) = result.errors.first() {
            return Err(LinkError::new(ErrorCode::ExecutionError, error.message.clone())
                .with_extension("errors", &result.errors));
        }

        result
            .parse_data()?
            .ok_or_else(|| LinkError::new(ErrorCode::NoData, "No data in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::NextLink;
    use crate::operation::Operation;
    use crate::result::{FetchResult, GraphQLError};
    use serde::Deserialize;
    use serde_json::json;

    fn echo_context(operation: Operation, _forward: NextLink) -> Observable {
        Observable::of([FetchResult::data(serde_json::Value::Object(
            operation.get_context(),
        ))])
    }

    #[test]
    fn test_client_config() {
        let config = ClientConfig::new()
            .timeout(Duration::from_secs(10))
            .header("Authorization", "Bearer token")
            .context_entry("tenant", "acme");

        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert!(config.headers.contains_key("Authorization"));
        assert_eq!(config.context["tenant"], "acme");
    }

    #[tokio::test]
    async fn test_defaults_merge_into_context() {
        let client = LinkClient::with_config(
            echo_context,
            ClientConfig::new()
                .header("Authorization", "Bearer default")
                .header("X-Client", "bgql")
                .context_entry("tenant", "acme"),
        );

        let result = client
            .query("{ a }")
            .header("Authorization", "Bearer override")
            .context_entry("tenant", "other")
            .first()
            .await
            .unwrap();

        assert_eq!(
            result.data,
            Some(json!({
                "tenant": "other",
                "headers": {"Authorization": "Bearer override", "X-Client": "bgql"}
            }))
        );
    }

    #[tokio::test]
    async fn test_data_deserializes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Hello {
            hello: String,
        }

        let client = LinkClient::new(|_operation: Operation, _forward: NextLink| {
            Observable::of([FetchResult::data(json!({"hello": "world"}))])
        });

        let data: Hello = client.query("{ hello }").data().await.unwrap();
        assert_eq!(data.hello, "world");
    }

    #[tokio::test]
    async fn test_data_surfaces_graphql_errors() {
        let client = LinkClient::new(|_operation: Operation, _forward: NextLink| {
            Observable::of([FetchResult::errors([GraphQLError::new("forbidden")])])
        });

        let err = client
            .mutate("mutation { drop }")
            .data::<serde_json::Value>()
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionError);
        assert_eq!(err.message, "forbidden");
    }

    #[tokio::test]
    async fn test_configured_timeout_wraps_chain() {
        let client = LinkClient::with_config(
            |_operation: Operation, _forward: NextLink| {
                Observable::new(|_subscriber| {})
            },
            ClientConfig::new().timeout(Duration::from_millis(10)),
        );

        let err = client.query("{ never }").first().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }
}
