//! Request entity and header mapping.
//!
//! # Responsibilities
//! - Hold one request's head, accumulated body and completion state
//! - Resolve pseudo-fields (method, path, query, scheme, authority) once
//!   at parse time
//! - Provide the header mapping shared by requests and responses
//!
//! # Design Decisions
//! - Header names keep their original case for serialization; lookups are
//!   ASCII case-insensitive
//! - Repeated header names collapse into an ordered list value
//! - Keep-alive is unknown (`None`) until the message is complete

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Marker that prefixes protocol-internal header keys.
pub const PSEUDO_MARKER: char = ':';

/// Unique identifier for a request, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };
}

impl Default for Version {
    fn default() -> Self {
        Version::HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// Named pseudo-fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoField {
    Method,
    Path,
    Query,
    Scheme,
    Authority,
    Status,
}

impl PseudoField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoField::Method => ":method",
            PseudoField::Path => ":path",
            PseudoField::Query => ":query",
            PseudoField::Scheme => ":scheme",
            PseudoField::Authority => ":authority",
            PseudoField::Status => ":status",
        }
    }

    /// Case-insensitive lookup of a `:name` key.
    pub fn from_key(key: &str) -> Option<Self> {
        [
            PseudoField::Method,
            PseudoField::Path,
            PseudoField::Query,
            PseudoField::Scheme,
            PseudoField::Authority,
            PseudoField::Status,
        ]
        .into_iter()
        .find(|field| field.as_str().eq_ignore_ascii_case(key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PseudoFields {
    method: Option<String>,
    path: Option<String>,
    query: Option<String>,
    scheme: Option<String>,
    authority: Option<String>,
    status: Option<String>,
}

impl PseudoFields {
    fn slot(&self, field: PseudoField) -> &Option<String> {
        match field {
            PseudoField::Method => &self.method,
            PseudoField::Path => &self.path,
            PseudoField::Query => &self.query,
            PseudoField::Scheme => &self.scheme,
            PseudoField::Authority => &self.authority,
            PseudoField::Status => &self.status,
        }
    }

    fn slot_mut(&mut self, field: PseudoField) -> &mut Option<String> {
        match field {
            PseudoField::Method => &mut self.method,
            PseudoField::Path => &mut self.path,
            PseudoField::Query => &mut self.query,
            PseudoField::Scheme => &mut self.scheme,
            PseudoField::Authority => &mut self.authority,
            PseudoField::Status => &mut self.status,
        }
    }
}

/// A header value: one string, or an ordered list for repeated fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    List(Vec<String>),
}

impl HeaderValue {
    /// The first (or only) value.
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(v) => Some(v),
            HeaderValue::List(vs) => vs.first().map(String::as_str),
        }
    }

    /// All values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            HeaderValue::Single(v) => std::slice::from_ref(v),
            HeaderValue::List(vs) => vs,
        };
        values.iter().map(String::as_str)
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::List(vec![first, value]);
            }
            HeaderValue::List(vs) => vs.push(value),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Single(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Single(v)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(vs: Vec<String>) -> Self {
        HeaderValue::List(vs)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(vs: Vec<&str>) -> Self {
        HeaderValue::List(vs.into_iter().map(str::to_string).collect())
    }
}

/// Ordered, case-preserving header mapping with pseudo-fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
    pseudo: PseudoFields,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `insert`.
    pub fn with(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style explicit response status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.set_status(status);
        self
    }

    /// Set a header, replacing any existing value under the same name.
    ///
    /// Keys naming a known pseudo-field set that field instead.
    pub fn insert(&mut self, name: &str, value: impl Into<HeaderValue>) {
        let value = value.into();

        if let Some(field) = PseudoField::from_key(name) {
            self.set_pseudo(field, value.first().unwrap_or_default());
            return;
        }

        match self.position(name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Add a value, turning an existing entry into a list.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((name.to_string(), HeaderValue::Single(value.to_string()))),
        }
    }

    /// Look up a header. `:`-prefixed keys resolve pseudo-fields.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(field) = PseudoField::from_key(name) {
            return self.pseudo(field);
        }
        self.get_all(name).and_then(HeaderValue::first)
    }

    pub fn get_all(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn pseudo(&self, field: PseudoField) -> Option<&str> {
        self.pseudo.slot(field).as_deref()
    }

    pub fn set_pseudo(&mut self, field: PseudoField, value: &str) {
        *self.pseudo.slot_mut(field) = Some(value.to_string());
    }

    /// Explicit response status, if one was set and parses.
    pub fn status(&self) -> Option<u16> {
        self.pseudo(PseudoField::Status)
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn set_status(&mut self, status: u16) {
        self.set_pseudo(PseudoField::Status, &status.to_string());
    }

    /// Regular (non-pseudo) entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub version: Version,
    pub headers: Headers,
    pub expect_continue: bool,
}

impl RequestHead {
    /// Build a head from the request line, splitting the target into path
    /// and query pseudo-fields.
    pub fn new(method: &str, target: &str, version: Version, mut headers: Headers) -> Self {
        headers.set_pseudo(PseudoField::Method, method);

        match target.split_once('?') {
            Some((path, query)) => {
                headers.set_pseudo(PseudoField::Path, path);
                headers.set_pseudo(PseudoField::Query, query);
            }
            None => headers.set_pseudo(PseudoField::Path, target),
        }

        Self {
            version,
            headers,
            expect_continue: false,
        }
    }
}

/// One request travelling through a connection's pipeline.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    head: RequestHead,
    body: BytesMut,
    complete: bool,
    keep_alive: Option<bool>,
}

impl Request {
    pub fn new(head: RequestHead) -> Self {
        Self {
            id: RequestId::new(),
            head,
            body: BytesMut::new(),
            complete: false,
            keep_alive: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &str {
        self.head.headers.pseudo(PseudoField::Method).unwrap_or("GET")
    }

    pub fn path(&self) -> &str {
        self.head.headers.pseudo(PseudoField::Path).unwrap_or("/")
    }

    pub fn query(&self) -> Option<&str> {
        self.head.headers.pseudo(PseudoField::Query)
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn expects_continue(&self) -> bool {
        self.head.expect_continue
    }

    /// Body bytes buffered so far (not including chunks pulled through the
    /// adapter).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Keep-alive disposition, known once the request is complete.
    pub fn keep_alive(&self) -> Option<bool> {
        self.keep_alive
    }

    /// The Upgrade token, lowercased and trimmed.
    pub fn upgrade_token(&self) -> Option<String> {
        self.head
            .headers
            .get("upgrade")
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub(crate) fn take_body(&mut self) -> Bytes {
        self.body.split().freeze()
    }

    pub(crate) fn mark_complete(&mut self, keep_alive: bool) {
        self.complete = true;
        self.keep_alive = Some(keep_alive);
    }
}
