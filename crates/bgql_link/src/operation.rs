//! The operation model carried along a link chain.

use crate::context::{Context, ContextMap};
use crate::error::{LinkError, LinkResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Name → value mapping used for variables and extensions.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// The kind of an executable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable GraphQL document, shared by reference between every link
/// that sees it.
///
/// The document is kept as source text. [`Document::operation_kind`] and
/// [`Document::operation_name`] are lexical lookups of the first executable
/// definition; nothing here validates the document.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Document(Arc<str>);

impl Document {
    pub fn new(source: impl Into<Arc<str>>) -> Self {
        Self(source.into())
    }

    /// Returns the document source text.
    pub fn source(&self) -> &str {
        &self.0
    }

    /// Returns the kind of the first operation in the document.
    pub fn operation_kind(&self) -> Option<OperationKind> {
        first_operation(&self.0).map(|(kind, _)| kind)
    }

    /// Returns the name of the first operation in the document, if it has one.
    pub fn operation_name(&self) -> Option<&str> {
        first_operation(&self.0).and_then(|(_, name)| name)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Document").field(&&*self.0).finish()
    }
}

impl From<&str> for Document {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for Document {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Document::from)
    }
}

/// Finds the first operation definition, skipping fragments.
fn first_operation(source: &str) -> Option<(OperationKind, Option<&str>)> {
    let mut scanner = Scanner::new(source);
    loop {
        scanner.skip_ignored();
        match scanner.peek()? {
            b'{' => return Some((OperationKind::Query, None)),
            _ => {
                let keyword = scanner.name()?;
                let kind = match keyword {
                    "query" => OperationKind::Query,
                    "mutation" => OperationKind::Mutation,
                    "subscription" => OperationKind::Subscription,
                    "fragment" => {
                        if !scanner.skip_definition() {
                            return None;
                        }
                        continue;
                    }
                    _ => return None,
                };
                scanner.skip_ignored();
                return Some((kind, scanner.name()));
            }
        }
    }
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        let pos = if src.starts_with('\u{feff}') { 3 } else { 0 };
        Self { src, pos }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ignored(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\n' | b'\r' | b',' => self.pos += 1,
                b'#' => self.skip_comment(),
                _ => break,
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == b'\n' || b == b'\r' {
                break;
            }
        }
    }

    fn name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(b) if b == b'_' || b.is_ascii_alphabetic() => self.pos += 1,
            _ => return None,
        }
        while matches!(self.peek(), Some(b) if b == b'_' || b.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        Some(&self.src[start..self.pos])
    }

    fn skip_string(&mut self) {
        let bytes = self.src.as_bytes();
        if bytes[self.pos..].starts_with(b"\"\"\"") {
            self.pos += 3;
            while self.pos < bytes.len() {
                if bytes[self.pos..].starts_with(b"\\\"\"\"") {
                    self.pos += 4;
                } else if bytes[self.pos..].starts_with(b"\"\"\"") {
                    self.pos += 3;
                    return;
                } else {
                    self.pos += 1;
                }
            }
            return;
        }

        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'"' | b'\n' => return,
                _ => {}
            }
        }
    }

    /// Skips past the selection set that closes the current definition.
    /// Braces nested inside parentheses (object values) do not count.
    fn skip_definition(&mut self) -> bool {
        let mut parens = 0usize;
        let mut braces = 0usize;
        let mut opened = false;
        while let Some(b) = self.peek() {
            match b {
                b'"' => {
                    self.skip_string();
                    continue;
                }
                b'#' => {
                    self.skip_comment();
                    continue;
                }
                b'(' => parens += 1,
                b')' => parens = parens.saturating_sub(1),
                b'{' => {
                    if parens == 0 {
                        opened = true;
                    }
                    braces += 1;
                }
                b'}' => {
                    braces = braces.saturating_sub(1);
                    if opened && braces == 0 && parens == 0 {
                        self.pos += 1;
                        return true;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        false
    }
}

/// Caller-side description of an operation to execute.
///
/// This is plain data: [`execute`](crate::execute::execute) turns it into an
/// [`Operation`] with a fresh [`Context`] on every subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: Option<Document>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub variables: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extensions: JsonMap,
    /// Initial context entries, copied into each execution.
    #[serde(skip)]
    pub context: ContextMap,
}

impl GraphQLRequest {
    /// Creates a request for the given document.
    pub fn new(query: impl Into<Document>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    /// Replaces the variables. Values that do not serialize to a JSON
    /// object are ignored.
    pub fn variables<V: Serialize>(mut self, variables: V) -> Self {
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(variables) {
            self.variables = map;
        }
        self
    }

    /// Sets a single variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.variables.insert(name.into(), v);
        }
        self
    }

    /// Sets the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Sets a single extension entry.
    pub fn extension(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.extensions.insert(name.into(), v);
        }
        self
    }

    /// Sets a single initial context entry.
    pub fn context_entry(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(name.into(), v);
        }
        self
    }
}

/// One in-flight operation.
///
/// Cloning an `Operation` shares its context; links that want to forward a
/// changed query or variables clone it and edit the public fields.
#[derive(Debug, Clone)]
pub struct Operation {
    pub query: Document,
    pub variables: JsonMap,
    /// Used for logging only; never affects execution.
    pub operation_name: Option<String>,
    pub extensions: JsonMap,
    context: Context,
}

impl Operation {
    /// Creates an operation with a fresh, empty context.
    pub fn new(query: impl Into<Document>) -> Self {
        Self {
            query: query.into(),
            variables: JsonMap::new(),
            operation_name: None,
            extensions: JsonMap::new(),
            context: Context::new(),
        }
    }

    /// Builds the operation for one execution of `request`.
    ///
    /// The context is a new instance seeded from `request.context`, and a
    /// missing operation name is taken from the document.
    pub fn from_request(request: &GraphQLRequest) -> LinkResult<Self> {
        let query = request
            .query
            .clone()
            .ok_or_else(|| LinkError::validation("Operation is missing a query document"))?;
        let operation_name = request
            .operation_name
            .clone()
            .or_else(|| query.operation_name().map(str::to_string));

        Ok(Self {
            query,
            variables: request.variables.clone(),
            operation_name,
            extensions: request.extensions.clone(),
            context: Context::from_map(request.context.clone()),
        })
    }

    /// Returns the operation kind, defaulting to `Query` when the document
    /// does not say.
    pub fn kind(&self) -> OperationKind {
        self.query.operation_kind().unwrap_or(OperationKind::Query)
    }

    /// Returns a handle to the shared context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns a snapshot of the context entries.
    pub fn get_context(&self) -> ContextMap {
        self.context.get_context()
    }

    /// Shallow-merges `partial` into the shared context.
    pub fn set_context(&self, partial: ContextMap) {
        self.context.set_context(partial);
    }

    /// Replaces the context handle, e.g. to thread an existing context into
    /// a follow-up operation.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Returns the transport-facing request for this operation. Context is
    /// not part of it.
    pub fn to_request(&self) -> GraphQLRequest {
        GraphQLRequest {
            query: Some(self.query.clone()),
            variables: self.variables.clone(),
            operation_name: self.operation_name.clone(),
            extensions: self.extensions.clone(),
            context: ContextMap::new(),
        }
    }
}
