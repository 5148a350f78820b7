//! Messages threaded through an interceptor chain.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::ExchangeId;
use crate::fault::Fault;

/// String-keyed property bag carried by messages and exchanges.
pub type Properties = HashMap<String, Value>;

/// Which leg of an invocation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    In,
    Out,
    Fault,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Protocol header names are case-insensitive; they are stored lowercased.
fn header_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Mutable state container for one leg of one invocation attempt.
///
/// A message is owned by its [`Exchange`](crate::exchange::Exchange); the
/// `exchange` field is a non-owning back-reference by id.
#[derive(Debug, Clone)]
pub struct Message {
    exchange: Option<ExchangeId>,
    direction: Direction,
    headers: BTreeMap<String, Vec<String>>,
    properties: Properties,
    content: Option<Bytes>,
    fault: Option<Fault>,
}

impl Message {
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            exchange: None,
            direction,
            headers: BTreeMap::new(),
            properties: Properties::new(),
            content: None,
            fault: None,
        }
    }

    /// Creates a message with the given payload.
    #[must_use]
    pub fn with_content(direction: Direction, content: impl Into<Bytes>) -> Self {
        let mut message = Self::new(direction);
        message.content = Some(content.into());
        message
    }

    /// Shallow copy used for a retried attempt: same exchange, direction
    /// reset to [`Direction::Out`], headers, properties and fault cleared, and
    /// the content handle replaced by `content`.
    #[must_use]
    pub fn fresh_attempt(&self, content: Option<Bytes>) -> Self {
        Self {
            exchange: self.exchange,
            direction: Direction::Out,
            headers: BTreeMap::new(),
            properties: Properties::new(),
            content,
            fault: None,
        }
    }

    /// Id of the exchange that owns this message, once bound.
    #[must_use]
    pub fn exchange_id(&self) -> Option<ExchangeId> {
        self.exchange
    }

    pub(crate) fn bind(&mut self, exchange: ExchangeId) {
        self.exchange = Some(exchange);
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    // -- headers --

    /// All headers, keyed by lowercased name.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    /// Returns all values recorded for a header. Names compare
    /// case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers.get(&header_key(name)).map(Vec::as_slice)
    }

    /// Appends a value to a header, keeping earlier values.
    pub fn add_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .entry(header_key(name.as_ref()))
            .or_default()
            .push(value.into());
    }

    /// Replaces all values of a header.
    pub fn set_header(&mut self, name: impl AsRef<str>, values: Vec<String>) {
        self.headers.insert(header_key(name.as_ref()), values);
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Vec<String>> {
        self.headers.remove(&header_key(name))
    }

    // -- properties --

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    // -- content --

    #[must_use]
    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        self.content = Some(content.into());
    }

    pub fn take_content(&mut self) -> Option<Bytes> {
        self.content.take()
    }

    // -- fault --

    /// The fault this message carries, set once it entered fault flow.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub(crate) fn mark_faulted(&mut self, fault: Fault) {
        self.direction = Direction::Fault;
        self.fault = Some(fault);
    }
}
