//! Results emitted on the `next` channel.

use crate::error::{LinkError, LinkResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One segment of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

/// A location in the request document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A GraphQL-level error reported inside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: impl IntoIterator<Item = PathSegment>) -> Self {
        self.path = Some(path.into_iter().collect());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extensions
                .get_or_insert_with(serde_json::Map::new)
                .insert(key.into(), v);
        }
        self
    }
}

/// One emitted result. `data` and `errors` are independently optional; a
/// partial success carries both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl FetchResult {
    /// Creates a result carrying only data.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Creates a result carrying only errors.
    pub fn errors(errors: impl IntoIterator<Item = GraphQLError>) -> Self {
        Self {
            errors: errors.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Decodes a transport response into a result.
    ///
    /// A body carrying `data` or `errors` is a GraphQL response whatever the
    /// status, so its errors stay on the `next` channel. Anything else is a
    /// transport failure: [`ErrorCode::HttpError`](crate::error::ErrorCode::HttpError)
    /// for a non-2xx status, otherwise
    /// [`ErrorCode::InvalidResponse`](crate::error::ErrorCode::InvalidResponse).
    pub fn from_response(status: u16, body: &[u8]) -> LinkResult<Self> {
        let success = (200..300).contains(&status);
        match serde_json::from_slice::<FetchResult>(body) {
            Ok(result) if result.data.is_some() || result.has_errors() => Ok(result),
            _ if !success => Err(LinkError::http_status(status)),
            Ok(_) => Err(LinkError::invalid_response(
                "Response has neither data nor errors",
            )),
            Err(e) => Err(LinkError::invalid_response(format!(
                "Response is not a GraphQL result: {e}"
            ))),
        }
    }

    /// Appends a GraphQL error.
    pub fn with_error(mut self, error: GraphQLError) -> Self {
        self.errors.push(error);
        self
    }

    /// Sets an extension entry.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extensions
                .get_or_insert_with(serde_json::Map::new)
                .insert(key.into(), v);
        }
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Deserializes `data` into `T`.
    pub fn parse_data<T: DeserializeOwned>(&self) -> LinkResult<Option<T>> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| LinkError::deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_result_round_trip_shape() {
        let result = FetchResult::data(json!({"user": null})).with_error(
            GraphQLError::new("not found").with_path(["user".into(), PathSegment::Index(0)]),
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["data"], json!({"user": null}));
        assert_eq!(json["errors"][0]["path"], json!(["user", 0]));
        assert!(json.get("extensions").is_none());
    }

    #[test]
    fn test_deserialize_wire_response() {
        let result: FetchResult = serde_json::from_value(json!({
            "errors": [{"message": "boom", "locations": [{"line": 1, "column": 3}]}]
        }))
        .unwrap();

        assert!(result.data.is_none());
        assert!(result.has_errors());
        assert_eq!(result.errors[0].locations.as_ref().unwrap()[0].column, 3);
    }

    #[test]
    fn test_from_response() {
        use crate::error::ErrorCode;

        let result = FetchResult::from_response(200, br#"{"data": {"x": 1}}"#).unwrap();
        assert_eq!(result.data, Some(json!({"x": 1})));

        // GraphQL errors on a 4xx stay a result.
        let result =
            FetchResult::from_response(400, br#"{"errors": [{"message": "bad"}]}"#).unwrap();
        assert_eq!(result.errors[0].message, "bad");

        let err = FetchResult::from_response(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert_eq!(err.code, ErrorCode::HttpError);

        let err = FetchResult::from_response(200, b"not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);

        let err = FetchResult::from_response(200, b"{}").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResponse);
    }

    #[test]
    fn test_parse_data() {
        #[derive(Deserialize)]
        struct Data {
            x: i32,
        }

        let result = FetchResult::data(json!({"x": 1}));
        let data: Data = result.parse_data().unwrap().unwrap();
        assert_eq!(data.x, 1);

        let err = FetchResult::data(json!({"x": "one"}))
            .parse_data::<Data>()
            .err()
            .unwrap();
        assert_eq!(err.code, crate::error::ErrorCode::DeserializeError);
    }
}
